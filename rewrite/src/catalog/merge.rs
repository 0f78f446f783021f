//! Merging of structurally equal subgraphs.
//!
//! Two constants with the same value, or two nodes applying the same op to the same inputs,
//! compute the same thing. The later one is replaced by the earlier one. Walking in toposort
//! order lets a merge expose the next one within a single sweep.

use std::collections::HashMap;
use std::sync::Arc;

use graft_ir::{ApplyId, FunctionGraph, OpRef, TensorData, VarId};
use smallvec::SmallVec;
use tracing::trace;

use crate::rewriter::GraphRewriter;

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeRewriter;

impl GraphRewriter for MergeRewriter {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn apply(&self, fgraph: &mut FunctionGraph) -> graft_ir::Result<bool> {
        let constants = merge_constants(fgraph)?;
        let nodes = merge_nodes(fgraph)?;
        Ok(constants || nodes)
    }
}

fn merge_constants(fgraph: &mut FunctionGraph) -> graft_ir::Result<bool> {
    let mut canonical: HashMap<Arc<TensorData>, VarId> = HashMap::new();
    let mut pairs = Vec::new();
    for var in fgraph.variables() {
        let Some(data) = fgraph.var(var).constant() else {
            continue;
        };
        match canonical.get(data) {
            Some(&first) => pairs.push((var, first)),
            None => {
                canonical.insert(Arc::clone(data), var);
            }
        }
    }

    let mut changed = false;
    for (duplicate, first) in pairs {
        match fgraph.replace(duplicate, first, "merge") {
            Ok(()) => changed = true,
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => trace!(%duplicate, %first, %error, "constant merge rejected"),
        }
    }
    Ok(changed)
}

fn merge_nodes(fgraph: &mut FunctionGraph) -> graft_ir::Result<bool> {
    let mut canonical: HashMap<(OpRef, SmallVec<[VarId; 4]>), ApplyId> = HashMap::new();
    let mut changed = false;
    for node in fgraph.toposort()? {
        if !fgraph.contains_node(node) {
            continue;
        }
        let apply = fgraph.node(node);
        // Two destroyers of one buffer are not interchangeable.
        if !apply.op().destroy_map().is_empty() {
            continue;
        }
        let key = (Arc::clone(apply.op()), SmallVec::from_slice(apply.inputs()));
        let Some(&first) = canonical.get(&key) else {
            canonical.insert(key, node);
            continue;
        };
        if !fgraph.contains_node(first) {
            canonical.insert(key, node);
            continue;
        }

        let pairs: Vec<(VarId, VarId)> =
            fgraph.node(node).outputs().iter().copied().zip(fgraph.node(first).outputs().iter().copied()).collect();
        match fgraph.replace_all(&pairs, "merge") {
            Ok(()) => {
                trace!(%node, %first, "merged duplicate node");
                changed = true;
            }
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => trace!(%node, %first, %error, "node merge rejected"),
        }
    }
    Ok(changed)
}
