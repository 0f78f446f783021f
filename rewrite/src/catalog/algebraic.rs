//! Algebraic identities on elementwise nodes.
//!
//! Each rewrite only fires when the replacement has a type the matched output accepts, so an
//! identity never changes a dtype or loses a broadcast dimension.

use graft_ir::ops::{Alloc, Elementwise, Elemwise, ScalarOp};
use graft_ir::{ApplyId, FunctionGraph, IntoOpRef, TensorData, VarId};

use super::{compatible, is_constant_fill};
use crate::rewriter::{NodeRewriter, RewriteContext, node_rewriter};

const ELEMWISE: &[&str] = &["elemwise"];

/// Inputs and output of `node` when it is an out-of-place `Elemwise{op}`.
fn match_scalar(fgraph: &FunctionGraph, node: ApplyId, op: ScalarOp) -> Option<(&[VarId], VarId)> {
    let apply = fgraph.node(node);
    let elemwise = apply.op_as::<Elemwise>()?;
    (elemwise.scalar() == op && elemwise.inplace().is_none()).then(|| (apply.inputs(), apply.outputs()[0]))
}

/// Input of the out-of-place `Elemwise{op}` producing `var`.
fn produced_by(fgraph: &FunctionGraph, var: VarId, op: ScalarOp) -> Option<&[VarId]> {
    let owner = fgraph.var(var).owner_node()?;
    match_scalar(fgraph, owner, op).map(|(inputs, _)| inputs)
}

/// `op(a, b)` where one side is a constant filled with `identity`: the other side.
fn drop_identity(fgraph: &FunctionGraph, node: ApplyId, op: ScalarOp, identity: f64, commutes: bool) -> Option<VarId> {
    let (inputs, out) = match_scalar(fgraph, node, op)?;
    let (a, b) = (inputs[0], inputs[1]);
    if is_constant_fill(fgraph, b, identity) && compatible(fgraph, out, a) {
        return Some(a);
    }
    if commutes && is_constant_fill(fgraph, a, identity) && compatible(fgraph, out, b) {
        return Some(b);
    }
    None
}

/// Replace `out` by a fill of its own type. Non-scalar fills become `Alloc` of a 0-d
/// constant so the buffer only exists while the graph runs.
fn fill_output(ctx: &mut RewriteContext<'_>, out: VarId, value: f64) -> graft_ir::Result<Option<Vec<VarId>>> {
    let ty = ctx.fgraph().var(out).ty();
    let dtype = ty.dtype();
    let Some(shape) = ty.static_shape() else {
        return Ok(None);
    };
    let fill = ctx.constant(TensorData::scalar(dtype, value));
    if shape.is_empty() {
        return Ok(Some(vec![fill]));
    }
    let filled = ctx.apply1(Alloc::new(&shape).into_op(), &[fill])?;
    Ok(Some(vec![filled]))
}

pub fn add_zero() -> impl NodeRewriter {
    node_rewriter("add_zero", ELEMWISE, |ctx, node| {
        Ok(drop_identity(ctx.fgraph(), node, ScalarOp::Add, 0.0, true).map(|x| vec![x]))
    })
}

pub fn mul_one() -> impl NodeRewriter {
    node_rewriter("mul_one", ELEMWISE, |ctx, node| {
        Ok(drop_identity(ctx.fgraph(), node, ScalarOp::Mul, 1.0, true).map(|x| vec![x]))
    })
}

pub fn div_one() -> impl NodeRewriter {
    node_rewriter("div_one", ELEMWISE, |ctx, node| {
        Ok(drop_identity(ctx.fgraph(), node, ScalarOp::TrueDiv, 1.0, false).map(|x| vec![x]))
    })
}

/// `x * 0` to zeros. Needs a fully static output shape.
pub fn mul_zero() -> impl NodeRewriter {
    node_rewriter("mul_zero", ELEMWISE, |ctx, node| {
        let fgraph = ctx.fgraph();
        let Some((inputs, out)) = match_scalar(fgraph, node, ScalarOp::Mul) else {
            return Ok(None);
        };
        if !inputs.iter().any(|&x| is_constant_fill(fgraph, x, 0.0)) {
            return Ok(None);
        }
        fill_output(ctx, out, 0.0)
    })
}

pub fn neg_neg() -> impl NodeRewriter {
    node_rewriter("neg_neg", ELEMWISE, |ctx, node| {
        let fgraph = ctx.fgraph();
        let Some((inputs, out)) = match_scalar(fgraph, node, ScalarOp::Neg) else {
            return Ok(None);
        };
        let Some(&[x]) = produced_by(fgraph, inputs[0], ScalarOp::Neg) else {
            return Ok(None);
        };
        Ok(compatible(fgraph, out, x).then(|| vec![x]))
    })
}

/// `x - x` to zeros.
pub fn sub_self() -> impl NodeRewriter {
    node_rewriter("sub_self", ELEMWISE, |ctx, node| {
        let Some((inputs, out)) = match_scalar(ctx.fgraph(), node, ScalarOp::Sub) else {
            return Ok(None);
        };
        if inputs[0] != inputs[1] {
            return Ok(None);
        }
        fill_output(ctx, out, 0.0)
    })
}

/// `x / x` to ones. Wrong where `x` is zero, hence only under `unsafe`.
pub fn div_self() -> impl NodeRewriter {
    node_rewriter("div_self", ELEMWISE, |ctx, node| {
        let Some((inputs, out)) = match_scalar(ctx.fgraph(), node, ScalarOp::TrueDiv) else {
            return Ok(None);
        };
        if inputs[0] != inputs[1] {
            return Ok(None);
        }
        fill_output(ctx, out, 1.0)
    })
}

/// `log(1 + x)` to `log1p(x)`.
pub fn log1p() -> impl NodeRewriter {
    node_rewriter("log1p", ELEMWISE, |ctx, node| {
        let fgraph = ctx.fgraph();
        let Some((inputs, out)) = match_scalar(fgraph, node, ScalarOp::Log) else {
            return Ok(None);
        };
        let Some(&[a, b]) = produced_by(fgraph, inputs[0], ScalarOp::Add) else {
            return Ok(None);
        };
        let x = if is_constant_fill(fgraph, b, 1.0) {
            a
        } else if is_constant_fill(fgraph, a, 1.0) {
            b
        } else {
            return Ok(None);
        };

        let replacement = ctx.apply1(Elemwise::new(ScalarOp::Log1p).into_op(), &[x])?;
        Ok(compatible(ctx.fgraph(), out, replacement).then(|| vec![replacement]))
    })
}

/// `log(exp(x))` to `x`.
pub fn log_exp() -> impl NodeRewriter {
    node_rewriter("log_exp", ELEMWISE, |ctx, node| {
        let fgraph = ctx.fgraph();
        let Some((inputs, out)) = match_scalar(fgraph, node, ScalarOp::Log) else {
            return Ok(None);
        };
        let Some(&[x]) = produced_by(fgraph, inputs[0], ScalarOp::Exp) else {
            return Ok(None);
        };
        Ok(compatible(fgraph, out, x).then(|| vec![x]))
    })
}
