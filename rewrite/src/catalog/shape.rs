use graft_ir::IntoOpRef;
use graft_ir::ops::Reshape;

use crate::rewriter::{NodeRewriter, node_rewriter};

/// `reshape(reshape(x, s1), s2)` to `reshape(x, s2)`.
pub fn reshape_chain() -> impl NodeRewriter {
    node_rewriter("reshape_chain", &["reshape"], |ctx, node| {
        let fgraph = ctx.fgraph();
        let apply = fgraph.node(node);
        let Some(outer) = apply.op_as::<Reshape>() else {
            return Ok(None);
        };
        let Some(inner) = fgraph.var(apply.inputs()[0]).owner_node() else {
            return Ok(None);
        };
        let inner = fgraph.node(inner);
        if inner.op_as::<Reshape>().is_none() {
            return Ok(None);
        }
        let (op, x) = (outer.clone().into_op(), inner.inputs()[0]);
        Ok(Some(vec![ctx.apply1(op, &[x])?]))
    })
}

/// Reshape to the shape the input already has.
pub fn useless_reshape() -> impl NodeRewriter {
    node_rewriter("useless_reshape", &["reshape"], |ctx, node| {
        let fgraph = ctx.fgraph();
        let apply = fgraph.node(node);
        let Some(reshape) = apply.op_as::<Reshape>() else {
            return Ok(None);
        };
        let x = apply.inputs()[0];
        let same = fgraph.var(x).ty().static_shape().is_some_and(|shape| shape.as_slice() == reshape.shape());
        Ok(same.then(|| vec![x]))
    })
}
