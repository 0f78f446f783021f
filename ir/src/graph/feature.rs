use std::any::Any;

use super::{ApplyId, Client, FunctionGraph, VarId};
use crate::error::Result;

/// A primitive graph mutation, as seen by features.
///
/// Every public mutation of a [`FunctionGraph`] decomposes into a sequence of these. Rolling a
/// failed mutation back replays the inverse of each applied change in reverse order, so a
/// feature that tracks state from `after` notifications stays consistent without knowing
/// about transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// `node` became a member. `seq` is its import sequence number.
    Import { node: ApplyId, seq: u64 },
    /// `node` stopped being a member.
    Prune { node: ApplyId, seq: u64 },
    /// The input slot `client` now reads `new` instead of `old`.
    ChangeInput { client: Client, old: VarId, new: VarId },
    /// `var` was appended as output `index`.
    AddOutput { var: VarId, index: usize },
    /// Output `index` (the last one) was removed.
    RemoveOutput { var: VarId, index: usize },
}

impl Change {
    pub fn inverse(&self) -> Change {
        match *self {
            Self::Import { node, seq } => Self::Prune { node, seq },
            Self::Prune { node, seq } => Self::Import { node, seq },
            Self::ChangeInput { client, old, new } => Self::ChangeInput { client, old: new, new: old },
            Self::AddOutput { var, index } => Self::RemoveOutput { var, index },
            Self::RemoveOutput { var, index } => Self::AddOutput { var, index },
        }
    }

    /// Node whose membership or inputs this change touches.
    pub fn node(&self) -> Option<ApplyId> {
        match self {
            Self::Import { node, .. } | Self::Prune { node, .. } => Some(*node),
            Self::ChangeInput { client, .. } => client.node(),
            Self::AddOutput { .. } | Self::RemoveOutput { .. } => None,
        }
    }
}

/// A listener attached to a [`FunctionGraph`].
///
/// Hooks run in attachment order. While `after` runs the feature is detached from the graph,
/// so `fgraph.feature::<Self>()` does not see it. `before` and `validate` may veto a mutation
/// by returning an error; `after` errors also abort the mutation (the change is still rolled
/// back through an inverse notification).
pub trait Feature: Send + 'static {
    fn name(&self) -> &'static str;

    fn on_attach(&mut self, _fgraph: &FunctionGraph) -> Result<()> {
        Ok(())
    }

    fn on_detach(&mut self, _fgraph: &FunctionGraph) {}

    /// Called before `change` is applied. Must not rely on being followed by `after`.
    fn before(&self, _fgraph: &FunctionGraph, _change: &Change, _reason: &str) -> Result<()> {
        Ok(())
    }

    /// Called after `change` is applied to the graph.
    fn after(&mut self, _fgraph: &FunctionGraph, _change: &Change, _reason: &str) -> Result<()> {
        Ok(())
    }

    /// Called once a whole mutation has been applied.
    fn validate(&self, _fgraph: &FunctionGraph) -> Result<()> {
        Ok(())
    }

    /// Extra `(before, after)` scheduling constraints between member nodes.
    fn orderings(&self, _fgraph: &FunctionGraph) -> Vec<(ApplyId, ApplyId)> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
