//! Graph storage and the observable function graph.

mod feature;
mod fgraph;
mod node;
mod print;
mod toposort;

pub use feature::{Change, Feature};
pub use fgraph::FunctionGraph;
pub use node::{Apply, NodeArena, Variable};
pub use toposort::Toposort;

/// Index of a [`Variable`] in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("v{_0}")]
pub struct VarId(pub(crate) u32);

/// Index of an [`Apply`] node in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("n{_0}")]
pub struct ApplyId(pub(crate) u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ApplyId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A consumer slot of a variable: an input position of a node, or a graph output position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum Client {
    #[display("{node}[{index}]")]
    Node { node: ApplyId, index: usize },
    #[display("output[{index}]")]
    Output { index: usize },
}

impl Client {
    pub fn node(&self) -> Option<ApplyId> {
        match self {
            Self::Node { node, .. } => Some(*node),
            Self::Output { .. } => None,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output { .. })
    }
}
