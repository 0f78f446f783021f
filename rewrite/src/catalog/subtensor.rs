use graft_ir::ops::{Elementwise, Elemwise, IncSubtensor, ScalarOp};
use graft_ir::{ApplyId, FunctionGraph, IntoOpRef, VarId};
use tracing::trace;

use super::{compatible, is_constant_fill};
use crate::rewriter::GraphRewriter;

/// Turns two independent updates of a zero buffer that are summed afterwards into one chain
/// of updates:
///
/// ```text
/// inc(B, a, i1) + inc(B, b, i2)  ->  inc(inc(B, a, i1), b, i2)
/// ```
///
/// Valid when `B` is all zeros and `i1`, `i2` are disjoint. The chain can later run in place,
/// the sum cannot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeIncSubtensor;

/// Out-of-place update producing `var`, read by nobody else.
fn exclusive_update(fgraph: &FunctionGraph, var: VarId) -> Option<(&IncSubtensor, &[VarId])> {
    let apply = fgraph.node(fgraph.var(var).owner_node()?);
    let inc = apply.op_as::<IncSubtensor>().filter(|inc| !inc.is_inplace())?;
    (fgraph.clients(var).len() == 1).then(|| (inc, apply.inputs()))
}

/// The replacement for the sum computed by `node`, allocated detached.
fn serialize(fgraph: &mut FunctionGraph, node: ApplyId) -> graft_ir::Result<Option<(VarId, VarId)>> {
    let apply = fgraph.node(node);
    let is_add = apply.op_as::<Elemwise>().is_some_and(|e| e.scalar() == ScalarOp::Add && e.inplace().is_none());
    if !is_add {
        return Ok(None);
    }
    let (first, second, out) = (apply.inputs()[0], apply.inputs()[1], apply.outputs()[0]);
    if first == second {
        return Ok(None);
    }
    let updates = (exclusive_update(fgraph, first), exclusive_update(fgraph, second));
    let (Some((inc1, inputs1)), Some((inc2, inputs2))) = updates else {
        return Ok(None);
    };
    let base = inputs1[0];
    if inputs2[0] != base || !is_constant_fill(fgraph, base, 0.0) || !inc1.disjoint(inc2) {
        return Ok(None);
    }

    let (op, update) = (inc2.clone().into_op(), inputs2[1]);
    let chained = fgraph.nodes_mut().apply1(op, &[first, update])?;
    Ok(compatible(fgraph, out, chained).then_some((out, chained)))
}

impl GraphRewriter for SerializeIncSubtensor {
    fn name(&self) -> &'static str {
        "serialize_inc_subtensor"
    }

    fn apply(&self, fgraph: &mut FunctionGraph) -> graft_ir::Result<bool> {
        let mut changed = false;
        for node in fgraph.toposort()? {
            if !fgraph.contains_node(node) {
                continue;
            }
            let (out, chained) = match serialize(fgraph, node) {
                Ok(Some(pair)) => pair,
                Ok(None) => continue,
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    trace!(%node, %error, "cannot chain the updates");
                    continue;
                }
            };
            match fgraph.replace(out, chained, "serialize_inc_subtensor") {
                Ok(()) => {
                    trace!(%node, "serialized inc_subtensor pair");
                    changed = true;
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => trace!(%node, %error, "serialized updates rejected"),
            }
        }
        Ok(changed)
    }
}
