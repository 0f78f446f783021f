//! In-place legality.
//!
//! The [`DestroyHandler`] feature tracks which variables share storage (through op view maps)
//! and which nodes overwrite their inputs (destroy maps). A destroyed buffer must not be read
//! by anything that can run after the destroyer, so the handler contributes
//! `reader -> destroyer` orderings to the toposort and rejects any mutation that leaves those
//! orderings unsatisfiable.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use smallvec::SmallVec;
use snafu::ensure;
use tracing::trace;

use crate::alias;
use crate::error::{
    AliasingCycleSnafu, DestroyedConstantSnafu, DestroyedProtectedSnafu, MultipleDestroyersSnafu,
    MultipleViewInputsSnafu, ReadAfterDestroySnafu, Result, SelfAliasedDestroySnafu,
};
use crate::graph::{ApplyId, Change, Client, Feature, FunctionGraph, VarId};
use crate::op::destroyed_inputs;
use crate::supervisor::Supervisor;

/// Cached aliasing relations of one node.
#[derive(Debug, Clone, Default)]
struct NodeAliasing {
    /// `(output, viewed input)`.
    views: SmallVec<[(VarId, VarId); 1]>,
    /// `(input position, destroyed input)`.
    destroyed: SmallVec<[(usize, VarId); 1]>,
}

#[derive(Debug, Default)]
pub struct DestroyHandler {
    /// View output -> the input it views.
    view_i: HashMap<VarId, VarId>,
    /// Input -> outputs viewing it.
    view_o: HashMap<VarId, BTreeSet<VarId>>,
    destroyers: BTreeSet<ApplyId>,
    cache: HashMap<ApplyId, NodeAliasing>,
}

impl DestroyHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The non-view variable whose storage `var` shares.
    pub fn root(&self, var: VarId) -> VarId {
        let mut current = var;
        while let Some(&viewed) = self.view_i.get(&current) {
            current = viewed;
        }
        current
    }

    /// `root` and every variable transitively viewing it.
    pub fn view_tree(&self, root: VarId) -> BTreeSet<VarId> {
        let mut tree = BTreeSet::from([root]);
        let mut stack = vec![root];
        while let Some(var) = stack.pop() {
            for &view in self.view_o.get(&var).into_iter().flatten() {
                if tree.insert(view) {
                    stack.push(view);
                }
            }
        }
        tree
    }

    pub fn destroyers(&self) -> impl Iterator<Item = ApplyId> + '_ {
        self.destroyers.iter().copied()
    }

    /// The node overwriting the storage `var` lives in, if any.
    pub fn destroyer_of(&self, var: VarId) -> Option<ApplyId> {
        let root = self.root(var);
        self.destroyed_roots().get(&root).and_then(|ds| ds.first()).map(|(node, _)| *node)
    }

    /// Destroyed buffers by root, with each destroyer and the input position it destroys.
    fn destroyed_roots(&self) -> BTreeMap<VarId, Vec<(ApplyId, usize)>> {
        let mut roots: BTreeMap<VarId, Vec<(ApplyId, usize)>> = BTreeMap::new();
        for node in &self.destroyers {
            for &(position, var) in self.cache.get(node).map(|c| c.destroyed.as_slice()).unwrap_or_default() {
                roots.entry(self.root(var)).or_default().push((*node, position));
            }
        }
        roots
    }

    /// Whether `node`, which declares input `position` in its destroy map, may destroy it.
    pub fn may_destroy(&self, fgraph: &FunctionGraph, node: ApplyId, position: usize) -> bool {
        fgraph.contains_node(node)
            && destroyed_inputs(fgraph.node(node).op().as_ref()).contains(&position)
            && self.check_destroy(fgraph, node, position).is_ok()
    }

    /// Whether `node` could be turned into an in-place node destroying input `position`
    /// without any aliasing conflict.
    pub fn can_destroy(&self, fgraph: &FunctionGraph, node: ApplyId, position: usize) -> bool {
        fgraph.contains_node(node)
            && position < fgraph.node(node).inputs().len()
            && self.check_destroy(fgraph, node, position).is_ok()
    }

    /// Whether `a` and `b` share storage.
    pub fn will_alias(&self, fgraph: &FunctionGraph, a: VarId, b: VarId) -> bool {
        alias::alias_root(fgraph, a) == alias::alias_root(fgraph, b)
    }

    /// Full legality check for `node` destroying input `position`, as if it were the only
    /// destroyer of that buffer.
    pub fn check_destroy(&self, fgraph: &FunctionGraph, node: ApplyId, position: usize) -> Result<()> {
        let var = fgraph.node(node).inputs()[position];
        let root = self.root(var);
        ensure!(!fgraph.var(root).is_constant(), DestroyedConstantSnafu { node, var: root });
        if let Some(other) = self.destroyer_of(var).filter(|d| *d != node) {
            return MultipleDestroyersSnafu { var: root, node, other }.fail();
        }

        let tree = self.view_tree(root);
        if let Some(supervisor) = fgraph.feature::<Supervisor>() {
            if let Some(&protected) = tree.iter().find(|v| supervisor.is_protected(fgraph, **v)) {
                return DestroyedProtectedSnafu { node, var: protected }.fail();
            }
        }
        self.check_readers(fgraph, node, position, &tree)?;

        let mut orderings = self.orderings(fgraph);
        orderings.extend(readers(fgraph, &tree, node).map(|reader| (reader, node)));
        check_schedulable(fgraph, &orderings)
    }

    /// The destroyer must not read the buffer through another input, and no reader of the
    /// buffer may depend on the destroyer.
    fn check_readers(
        &self,
        fgraph: &FunctionGraph,
        destroyer: ApplyId,
        position: usize,
        tree: &BTreeSet<VarId>,
    ) -> Result<()> {
        let inputs = fgraph.node(destroyer).inputs();
        for (i, input) in inputs.iter().enumerate() {
            ensure!(
                i == position || !tree.contains(input),
                SelfAliasedDestroySnafu { node: destroyer, var: inputs[position], position: i }
            );
        }
        for &var in tree {
            for reader in fgraph.consumers(var).filter(|reader| *reader != destroyer) {
                ensure!(!fgraph.is_ancestor(destroyer, reader), ReadAfterDestroySnafu { node: destroyer, reader, var });
            }
        }
        Ok(())
    }

    fn learn(&mut self, fgraph: &FunctionGraph, node: ApplyId) -> Result<()> {
        let apply = fgraph.node(node);
        let mut entry = NodeAliasing::default();
        let mut result = Ok(());
        for (output, inputs) in apply.op().view_map() {
            if inputs.len() > 1 && result.is_ok() {
                result = MultipleViewInputsSnafu { node, output }.fail();
            }
            let viewed = inputs.first().and_then(|i| apply.inputs().get(*i));
            if let (Some(&out), Some(&viewed)) = (apply.outputs().get(output), viewed) {
                entry.views.push((out, viewed));
            }
        }
        for position in destroyed_inputs(apply.op().as_ref()) {
            if let Some(&var) = apply.inputs().get(position) {
                entry.destroyed.push((position, var));
            }
        }

        for &(out, viewed) in &entry.views {
            self.view_i.insert(out, viewed);
            self.view_o.entry(viewed).or_default().insert(out);
        }
        if !entry.destroyed.is_empty() {
            trace!(%node, destroyed = ?entry.destroyed, "destroyer registered");
            self.destroyers.insert(node);
        }
        if !entry.views.is_empty() || !entry.destroyed.is_empty() {
            self.cache.insert(node, entry);
        }
        result
    }

    fn forget(&mut self, node: ApplyId) {
        if let Some(entry) = self.cache.remove(&node) {
            for (out, viewed) in entry.views {
                self.view_i.remove(&out);
                if let Some(views) = self.view_o.get_mut(&viewed) {
                    views.remove(&out);
                    if views.is_empty() {
                        self.view_o.remove(&viewed);
                    }
                }
            }
        }
        self.destroyers.remove(&node);
    }
}

/// Member nodes other than `except` reading any variable of `tree`.
fn readers<'a>(
    fgraph: &'a FunctionGraph,
    tree: &'a BTreeSet<VarId>,
    except: ApplyId,
) -> impl Iterator<Item = ApplyId> + 'a {
    tree.iter().flat_map(move |&var| fgraph.consumers(var)).filter(move |reader| *reader != except)
}

fn check_schedulable(fgraph: &FunctionGraph, orderings: &[(ApplyId, ApplyId)]) -> Result<()> {
    let mut order = fgraph.toposort_iter_with(orderings);
    order.by_ref().for_each(drop);
    match order.blocked() {
        Some(node) => AliasingCycleSnafu { node }.fail(),
        None => Ok(()),
    }
}

impl Feature for DestroyHandler {
    fn name(&self) -> &'static str {
        "destroy_handler"
    }

    fn on_attach(&mut self, fgraph: &FunctionGraph) -> Result<()> {
        for node in fgraph.nodes() {
            self.learn(fgraph, node)?;
        }
        Ok(())
    }

    fn on_detach(&mut self, _fgraph: &FunctionGraph) {
        *self = Self::default();
    }

    fn after(&mut self, fgraph: &FunctionGraph, change: &Change, _reason: &str) -> Result<()> {
        match *change {
            Change::Import { node, .. } => self.learn(fgraph, node),
            Change::Prune { node, .. } => {
                self.forget(node);
                Ok(())
            }
            Change::ChangeInput { client: Client::Node { node, .. }, .. } if self.cache.contains_key(&node) => {
                self.forget(node);
                self.learn(fgraph, node)
            }
            _ => Ok(()),
        }
    }

    fn validate(&self, fgraph: &FunctionGraph) -> Result<()> {
        for (root, destroyers) in self.destroyed_roots() {
            let (node, position) = destroyers[0];
            if let Some(&(other, _)) = destroyers.get(1) {
                return MultipleDestroyersSnafu { var: root, node: other, other: node }.fail();
            }
            ensure!(!fgraph.var(root).is_constant(), DestroyedConstantSnafu { node, var: root });
            self.check_readers(fgraph, node, position, &self.view_tree(root))?;
        }
        check_schedulable(fgraph, &self.orderings(fgraph))
    }

    fn orderings(&self, fgraph: &FunctionGraph) -> Vec<(ApplyId, ApplyId)> {
        let mut orderings = Vec::new();
        for (root, destroyers) in self.destroyed_roots() {
            let tree = self.view_tree(root);
            for &(destroyer, _) in &destroyers {
                orderings.extend(readers(fgraph, &tree, destroyer).map(|reader| (reader, destroyer)));
            }
        }
        orderings.sort_unstable();
        orderings.dedup();
        orderings
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
