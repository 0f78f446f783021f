//! Local and global rewrites.
//!
//! A [`NodeRewriter`] looks at one node and proposes replacements for its outputs; the driver
//! decides whether and how to apply them. A [`GraphRewriter`] sees the whole graph and mutates
//! it directly.

use graft_ir::{ApplyId, FunctionGraph, OpRef, TensorData, VarId};

/// The view a local rewrite gets of the graph.
///
/// The graph itself is read-only here. New nodes can be allocated, but they stay detached
/// until the driver replaces the matched node's outputs with them.
pub struct RewriteContext<'a> {
    fgraph: &'a mut FunctionGraph,
}

impl<'a> RewriteContext<'a> {
    pub fn new(fgraph: &'a mut FunctionGraph) -> Self {
        Self { fgraph }
    }

    pub fn fgraph(&self) -> &FunctionGraph {
        self.fgraph
    }

    /// Allocate a detached node.
    pub fn apply(&mut self, op: OpRef, inputs: &[VarId]) -> graft_ir::Result<ApplyId> {
        self.fgraph.nodes_mut().apply(op, inputs)
    }

    /// Allocate a detached single-output node and return its output.
    pub fn apply1(&mut self, op: OpRef, inputs: &[VarId]) -> graft_ir::Result<VarId> {
        self.fgraph.nodes_mut().apply1(op, inputs)
    }

    pub fn constant(&mut self, data: TensorData) -> VarId {
        self.fgraph.nodes_mut().constant(data)
    }
}

/// A rewrite of a single node.
pub trait NodeRewriter: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Op families this rewrite can match. `None` means every node is a candidate.
    fn tracks(&self) -> Option<&'static [&'static str]> {
        None
    }

    /// Replacements for the outputs of `node`, one per output, or `None` when the rewrite
    /// does not apply.
    ///
    /// Errors are treated as a failed candidate: the driver records them and moves on,
    /// unless they are fatal.
    fn transform(&self, ctx: &mut RewriteContext<'_>, node: ApplyId) -> graft_ir::Result<Option<Vec<VarId>>>;
}

/// A rewrite of the whole graph.
pub trait GraphRewriter: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Prepare the graph before the first `apply`, e.g. attach a feature this rewrite needs.
    fn add_requirements(&self, _fgraph: &mut FunctionGraph) -> graft_ir::Result<()> {
        Ok(())
    }

    /// Rewrite the graph. Returns whether anything changed.
    fn apply(&self, fgraph: &mut FunctionGraph) -> graft_ir::Result<bool>;
}

/// A [`NodeRewriter`] backed by a function.
pub struct FnNodeRewriter<F> {
    name: &'static str,
    tracks: Option<&'static [&'static str]>,
    transform: F,
}

/// Build a local rewrite from a function. An empty `tracks` matches every node.
pub fn node_rewriter<F>(name: &'static str, tracks: &'static [&'static str], transform: F) -> FnNodeRewriter<F>
where
    F: Fn(&mut RewriteContext<'_>, ApplyId) -> graft_ir::Result<Option<Vec<VarId>>> + Send + Sync + 'static,
{
    let tracks = if tracks.is_empty() { None } else { Some(tracks) };
    FnNodeRewriter { name, tracks, transform }
}

impl<F> NodeRewriter for FnNodeRewriter<F>
where
    F: Fn(&mut RewriteContext<'_>, ApplyId) -> graft_ir::Result<Option<Vec<VarId>>> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn tracks(&self) -> Option<&'static [&'static str]> {
        self.tracks
    }

    fn transform(&self, ctx: &mut RewriteContext<'_>, node: ApplyId) -> graft_ir::Result<Option<Vec<VarId>>> {
        (self.transform)(ctx, node)
    }
}
