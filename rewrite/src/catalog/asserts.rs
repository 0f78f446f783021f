use graft_ir::IntoOpRef;
use graft_ir::ops::{Assert, ViewOp};

use super::constant_value;
use crate::rewriter::{NodeRewriter, node_rewriter};

/// Drop assert conditions that are constant and true. With none left, the assert itself goes.
pub fn useless_assert() -> impl NodeRewriter {
    node_rewriter("useless_assert", &["assert"], |ctx, node| {
        let fgraph = ctx.fgraph();
        let apply = fgraph.node(node);
        let Some(assert) = apply.op_as::<Assert>() else {
            return Ok(None);
        };
        let Some((&x, conditions)) = apply.inputs().split_first() else {
            return Ok(None);
        };
        let kept: Vec<_> = conditions
            .iter()
            .copied()
            .filter(|&cond| !constant_value(fgraph, cond).is_some_and(|data| data.all_true()))
            .collect();
        if kept.len() == conditions.len() {
            return Ok(None);
        }
        if kept.is_empty() {
            return Ok(Some(vec![x]));
        }

        let op = assert.clone().into_op();
        let inputs: Vec<_> = std::iter::once(x).chain(kept).collect();
        Ok(Some(vec![ctx.apply1(op, &inputs)?]))
    })
}

/// Drop every assert, checked or not.
pub fn remove_all_assert() -> impl NodeRewriter {
    node_rewriter("remove_all_assert", &["assert"], |ctx, node| {
        let apply = ctx.fgraph().node(node);
        if apply.op_as::<Assert>().is_none() {
            return Ok(None);
        }
        Ok(apply.inputs().first().map(|&x| vec![x]))
    })
}

/// A view nobody needs as a distinct variable. Views returned as graph outputs stay, since
/// the caller may rely on them not being the input itself.
pub fn useless_view() -> impl NodeRewriter {
    node_rewriter("useless_view", &["view"], |ctx, node| {
        let fgraph = ctx.fgraph();
        let apply = fgraph.node(node);
        if !apply.op().is::<ViewOp>() || fgraph.is_output(apply.outputs()[0]) {
            return Ok(None);
        }
        Ok(Some(vec![apply.inputs()[0]]))
    })
}
