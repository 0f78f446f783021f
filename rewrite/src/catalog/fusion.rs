use graft_ir::ops::{Composite, ScalarExpr, as_elementwise};
use graft_ir::{ApplyId, FunctionGraph, IntoOpRef, VarId};
use tracing::trace;

use super::compatible;
use crate::rewriter::{NodeRewriter, RewriteContext};

/// Fuse an elementwise node with the elementwise producers of its inputs into one
/// [`Composite`].
///
/// A producer is absorbed only when the fused node is its sole reader and its output is not
/// a graph output, so no intermediate is computed twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElemwiseFusion;

/// The first input of `node` whose producer can be absorbed, with that producer.
fn fusible_input(fgraph: &FunctionGraph, node: ApplyId) -> Option<(VarId, ApplyId)> {
    fgraph.node(node).inputs().iter().find_map(|&var| {
        let producer = fgraph.var(var).owner_node()?;
        let elementwise = as_elementwise(fgraph.node(producer).op().as_ref())?;
        let sole_reader = fgraph.clients(var).iter().all(|client| client.node() == Some(node));
        (elementwise.inplace().is_none() && sole_reader && !fgraph.is_output(var)).then_some((var, producer))
    })
}

impl NodeRewriter for ElemwiseFusion {
    fn name(&self) -> &'static str {
        "fuse_elemwise"
    }

    fn tracks(&self) -> Option<&'static [&'static str]> {
        Some(&["elemwise"])
    }

    fn transform(&self, ctx: &mut RewriteContext<'_>, node: ApplyId) -> graft_ir::Result<Option<Vec<VarId>>> {
        let fgraph = ctx.fgraph();
        let apply = fgraph.node(node);
        let Some(consumer) = as_elementwise(apply.op().as_ref()).filter(|e| e.inplace().is_none()) else {
            return Ok(None);
        };
        let Some((fused_var, producer)) = fusible_input(fgraph, node) else {
            return Ok(None);
        };
        let producer_apply = fgraph.node(producer);
        let Some(inner) = as_elementwise(producer_apply.op().as_ref()) else {
            return Ok(None);
        };

        // Inputs of the fused node, in order of first use, without duplicates.
        let mut inputs: Vec<VarId> = Vec::new();
        let mut slot = |var: VarId| match inputs.iter().position(|v| *v == var) {
            Some(index) => index,
            None => {
                inputs.push(var);
                inputs.len() - 1
            }
        };
        let mut outer_slots = Vec::with_capacity(apply.inputs().len());
        let mut inner_slots = Vec::new();
        for &var in apply.inputs() {
            if var == fused_var {
                if inner_slots.is_empty() {
                    inner_slots = producer_apply.inputs().iter().map(|&v| slot(v)).collect();
                }
                outer_slots.push(None);
            } else {
                outer_slots.push(Some(slot(var)));
            }
        }

        let inner_expr = inner.expr().substitute(&|j| ScalarExpr::Input(inner_slots[j]));
        let expr = consumer.expr().substitute(&|i| match outer_slots[i] {
            Some(index) => ScalarExpr::Input(index),
            None => inner_expr.clone(),
        });
        let out = apply.outputs()[0];
        trace!(%node, %producer, %expr, "fusing elementwise nodes");

        let op = Composite::new(expr, inputs.len()).into_op();
        let fused = ctx.apply1(op, &inputs)?;
        Ok(compatible(ctx.fgraph(), out, fused).then(|| vec![fused]))
    }
}
