use std::sync::Arc;

use graft_ir::{ApplyId, TensorData, VarId};
use tracing::trace;

use crate::rewriter::{NodeRewriter, RewriteContext};

/// Evaluate nodes whose inputs are all constants and replace their outputs by the results.
///
/// The op gets a veto through `do_constant_folding`, and ops without a `perform` are left
/// alone. An evaluation error fails the candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantFolding;

impl NodeRewriter for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn transform(&self, ctx: &mut RewriteContext<'_>, node: ApplyId) -> graft_ir::Result<Option<Vec<VarId>>> {
        let fgraph = ctx.fgraph();
        let apply = fgraph.node(node);
        if apply.inputs().is_empty() || !apply.op().destroy_map().is_empty() {
            return Ok(None);
        }
        let Some(args) =
            apply.inputs().iter().map(|&var| fgraph.var(var).constant().cloned()).collect::<Option<Vec<_>>>()
        else {
            return Ok(None);
        };
        if !apply.op().do_constant_folding(fgraph, node) {
            return Ok(None);
        }

        let refs: Vec<&TensorData> = args.iter().map(Arc::as_ref).collect();
        let Some(result) = apply.op().perform(&refs) else {
            return Ok(None);
        };
        let values = result?;
        if values.len() != apply.outputs().len() {
            return Ok(None);
        }
        let misfit = apply.outputs().iter().zip(&values).find(|(out, data)| !fgraph.var(**out).ty().accepts(data));
        if let Some((&out, _)) = misfit {
            trace!(%node, %out, "folded value does not fit the output type");
            return Ok(None);
        }

        Ok(Some(values.into_iter().map(|data| ctx.constant(data)).collect()))
    }
}
