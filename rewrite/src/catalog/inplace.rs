//! Rewrites that turn out-of-place nodes into in-place ones.
//!
//! Legality is the [`DestroyHandler`]'s business: a candidate is only proposed when the handler
//! sees no conflict, and the graph's validation rolls back anything that slips through.

use graft_ir::ops::{Elementwise, IncSubtensor, as_elementwise};
use graft_ir::{ApplyId, DestroyHandler, FunctionGraph, IntoOpRef, VarId};
use tracing::{debug, trace};

use crate::rewriter::{GraphRewriter, NodeRewriter, RewriteContext};

fn ensure_destroy_handler(fgraph: &mut FunctionGraph) -> graft_ir::Result<bool> {
    if fgraph.has_feature::<DestroyHandler>() {
        return Ok(false);
    }
    debug!("attaching destroy handler");
    fgraph.attach_feature(DestroyHandler::new())?;
    Ok(true)
}

/// Attaches a [`DestroyHandler`] so the in-place passes after it can check legality. Never
/// reports a change.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddDestroyHandler;

impl GraphRewriter for AddDestroyHandler {
    fn name(&self) -> &'static str {
        "add_destroy_handler"
    }

    fn apply(&self, fgraph: &mut FunctionGraph) -> graft_ir::Result<bool> {
        ensure_destroy_handler(fgraph)?;
        Ok(false)
    }
}

/// `inc_subtensor(x, y)` to the variant that writes into `x`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InplaceIncSubtensor;

impl NodeRewriter for InplaceIncSubtensor {
    fn name(&self) -> &'static str {
        "inplace_inc_subtensor"
    }

    fn tracks(&self) -> Option<&'static [&'static str]> {
        Some(&["inc_subtensor"])
    }

    fn transform(&self, ctx: &mut RewriteContext<'_>, node: ApplyId) -> graft_ir::Result<Option<Vec<VarId>>> {
        let fgraph = ctx.fgraph();
        let apply = fgraph.node(node);
        let Some(inc) = apply.op_as::<IncSubtensor>().filter(|inc| !inc.is_inplace()) else {
            return Ok(None);
        };
        let Some(handler) = fgraph.feature::<DestroyHandler>() else {
            return Ok(None);
        };
        if !handler.can_destroy(fgraph, node, 0) {
            trace!(%node, "inc_subtensor base cannot be destroyed");
            return Ok(None);
        }
        let (op, inputs) = (inc.with_inplace(true).into_op(), apply.inputs().to_vec());
        Ok(Some(vec![ctx.apply1(op, &inputs)?]))
    }
}

/// Make each out-of-place elementwise node overwrite one of its inputs.
///
/// Candidates are the inputs with exactly the output's type that are not constants, tried in
/// input order. When the graph rejects one, the next is tried.
#[derive(Debug, Clone, Copy, Default)]
pub struct InplaceElemwise;

fn candidates(fgraph: &FunctionGraph, node: ApplyId) -> Vec<usize> {
    let apply = fgraph.node(node);
    let out = fgraph.var(apply.outputs()[0]).ty();
    apply
        .inputs()
        .iter()
        .enumerate()
        .filter(|&(_, &var)| fgraph.var(var).ty() == out && !fgraph.var(var).is_constant())
        .map(|(position, _)| position)
        .collect()
}

impl GraphRewriter for InplaceElemwise {
    fn name(&self) -> &'static str {
        "inplace_elemwise"
    }

    fn add_requirements(&self, fgraph: &mut FunctionGraph) -> graft_ir::Result<()> {
        ensure_destroy_handler(fgraph).map(|_| ())
    }

    fn apply(&self, fgraph: &mut FunctionGraph) -> graft_ir::Result<bool> {
        let mut changed = false;
        for node in fgraph.toposort()? {
            if !fgraph.contains_node(node) {
                continue;
            }
            let Some(elementwise) = as_elementwise(fgraph.node(node).op().as_ref()) else {
                continue;
            };
            if elementwise.inplace().is_some() {
                continue;
            }
            let variants: Vec<_> = candidates(fgraph, node)
                .into_iter()
                .map(|position| (position, elementwise.with_inplace(Some(position))))
                .collect();

            for (position, op) in variants {
                let legal = fgraph.feature::<DestroyHandler>().is_some_and(|h| h.can_destroy(fgraph, node, position));
                if !legal {
                    continue;
                }
                let inputs = fgraph.node(node).inputs().to_vec();
                let out = fgraph.node(node).outputs()[0];
                let replacement = fgraph.nodes_mut().apply1(op, &inputs)?;
                match fgraph.replace(out, replacement, "inplace_elemwise") {
                    Ok(()) => {
                        trace!(%node, position, "elementwise node now runs in place");
                        changed = true;
                        break;
                    }
                    Err(error) if error.is_fatal() => return Err(error),
                    Err(error) => trace!(%node, position, %error, "in-place candidate rejected"),
                }
            }
        }
        Ok(changed)
    }
}
