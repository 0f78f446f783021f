use graft_ir::{ApplyId, VarId};
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(context(false), display("{source}"))]
    Graph { source: graft_ir::Error },

    // ===== Registration and queries =====
    #[snafu(display("a rewrite named {name} is already registered"))]
    DuplicateRewrite { name: String },

    #[snafu(display("no rewrite named {name} is registered"))]
    UnknownEntry { name: String },

    #[snafu(display("invalid tag expression {expression:?}: {reason}"))]
    InvalidTagExpression { expression: String, reason: String },

    #[snafu(display("unknown optimization level {name:?}"))]
    UnknownOptLevel { name: String },

    #[snafu(display("invalid value {value:?} for {key}"))]
    InvalidConfig { key: &'static str, value: String },

    // ===== Compilation =====
    #[snafu(display("input {index} ({var}) is not needed to compute the outputs"))]
    UnusedInput { index: usize, var: VarId },

    #[snafu(display("node {node} works in place, but in-place operations were not accepted"))]
    InplaceNotAccepted { node: ApplyId },
}

impl Error {
    /// Whether the graph being rewritten can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Graph { source } if source.is_fatal())
    }
}
