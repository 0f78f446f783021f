//! Storage aliasing analysis over op view and destroy maps.

use std::collections::BTreeSet;

use crate::graph::{Client, FunctionGraph, VarId};
use crate::op::Op;

/// Input position an output shares storage with, through either alias map.
fn aliased_input(op: &dyn Op, output: usize) -> Option<usize> {
    op.view_map()
        .get(&output)
        .and_then(|inputs| inputs.first().copied())
        .or_else(|| op.destroy_map().get(&output).and_then(|inputs| inputs.first().copied()))
}

/// The variable owning the storage `var` lives in.
pub fn alias_root(fgraph: &FunctionGraph, var: VarId) -> VarId {
    let mut current = var;
    while let Some((node, output)) = fgraph.var(current).owner() {
        let apply = fgraph.node(node);
        match aliased_input(apply.op().as_ref(), output).and_then(|i| apply.inputs().get(i)) {
            Some(&input) => current = input,
            None => break,
        }
    }
    current
}

/// Every member variable sharing storage with `var`.
pub fn view_tree(fgraph: &FunctionGraph, var: VarId) -> BTreeSet<VarId> {
    let root = alias_root(fgraph, var);
    let mut tree = BTreeSet::from([root]);
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        for client in fgraph.clients(current) {
            let Client::Node { node, index } = *client else {
                continue;
            };
            let apply = fgraph.node(node);
            for (output, &out_var) in apply.outputs().iter().enumerate() {
                if aliased_input(apply.op().as_ref(), output) == Some(index) && tree.insert(out_var) {
                    stack.push(out_var);
                }
            }
        }
    }
    tree
}

/// Computed variables that may share storage with any of `outputs`.
///
/// A backend must not recycle the storage of these between calls, since the caller holds
/// on to the outputs.
pub fn infer_reuse_pattern(fgraph: &FunctionGraph, outputs: &[VarId]) -> BTreeSet<VarId> {
    outputs
        .iter()
        .flat_map(|&out| view_tree(fgraph, out))
        .filter(|var| fgraph.var(*var).owner().is_some())
        .collect()
}
