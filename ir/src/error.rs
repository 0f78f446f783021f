use graft_dtype::DType;
use snafu::Snafu;

use crate::graph::{ApplyId, Client, VarId};
use crate::types::TensorType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of [`Error`]s, used by the rewrite driver to decide
/// whether a failed candidate can be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorKind {
    Structure,
    TypeMismatch,
    TypeInference,
    AliasingConflict,
    Evaluation,
}

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    // ===== Structure =====
    /// Rewiring or importing would make a node depend on itself.
    #[snafu(display("cycle detected through node {node}"))]
    Cycle { node: ApplyId },

    /// A root variable is neither a graph input nor a constant.
    #[snafu(display("variable {var} is not a graph input, a constant, or the output of a node"))]
    MissingInput { var: VarId },

    #[snafu(display("variable {var} does not exist in the arena"))]
    UnknownVariable { var: VarId },

    #[snafu(display("node {node} does not exist in the arena"))]
    UnknownNode { node: ApplyId },

    #[snafu(display("node {node} is not a member of the graph"))]
    NotInGraph { node: ApplyId },

    #[snafu(display("graph input {var} must not have an owner"))]
    InputHasOwner { var: VarId },

    #[snafu(display("variable {var} is declared as a graph input more than once"))]
    DuplicateInput { var: VarId },

    #[snafu(display("{client} is not a client slot of this graph"))]
    InvalidClient { client: Client },

    #[snafu(display("a feature named {name} is already attached"))]
    FeatureAlreadyAttached { name: &'static str },

    /// Integrity audit failure. Never recoverable.
    #[snafu(display("graph integrity violated: {detail}"))]
    Corrupted { detail: String },

    // ===== Type mismatch =====
    #[snafu(display("cannot replace {old} of type {old_type} with {new} of type {new_type}"))]
    TypeMismatch { old: VarId, new: VarId, old_type: Box<TensorType>, new_type: Box<TensorType> },

    // ===== Type inference =====
    #[snafu(display("{op} expects {expected} inputs, got {actual}"))]
    Arity { op: String, expected: usize, actual: usize },

    #[snafu(display("{op}: cannot broadcast {lhs} with {rhs}"))]
    IncompatibleShapes { op: String, lhs: Box<TensorType>, rhs: Box<TensorType> },

    #[snafu(display("{op}: no common dtype for {dtypes:?}"))]
    NoCommonDType { op: String, dtypes: Vec<DType> },

    #[snafu(display("reshape size mismatch: input size {input_size} != output size {output_size}"))]
    ReshapeSizeMismatch { input_size: usize, output_size: usize },

    #[snafu(display("{op}: {reason}"))]
    TypeInference { op: String, reason: String },

    // ===== Aliasing conflicts =====
    #[snafu(display("{node} destroys {var}, which is already destroyed by {other}"))]
    MultipleDestroyers { var: VarId, node: ApplyId, other: ApplyId },

    #[snafu(display("{node} destroys constant {var}"))]
    DestroyedConstant { node: ApplyId, var: VarId },

    #[snafu(display("{node} destroys protected variable {var}"))]
    DestroyedProtected { node: ApplyId, var: VarId },

    #[snafu(display("{node} destroys {var} and reads the same storage through input {position}"))]
    SelfAliasedDestroy { node: ApplyId, var: VarId, position: usize },

    #[snafu(display("{reader} reads {var} after {node} destroys it"))]
    ReadAfterDestroy { node: ApplyId, reader: ApplyId, var: VarId },

    #[snafu(display("in-place orderings introduce a cycle through {node}"))]
    AliasingCycle { node: ApplyId },

    #[snafu(display("output {output} of {node} views more than one input"))]
    MultipleViewInputs { node: ApplyId, output: usize },

    #[snafu(display("{op} declares alias input {index}, but has only {count} inputs"))]
    InvalidAliasMap { op: String, index: usize, count: usize },

    // ===== Evaluation =====
    #[snafu(display("{op} cannot be evaluated"))]
    NotEvaluable { op: String },

    #[snafu(display("expected {expected} values, got {actual}"))]
    ValueCount { expected: usize, actual: usize },

    #[snafu(display("value {value_type} does not fit {expected}"))]
    ValueTypeMismatch { value_type: Box<TensorType>, expected: Box<TensorType> },

    #[snafu(display("data length {len} does not match shape {shape:?}"))]
    DataShapeMismatch { len: usize, shape: Vec<usize> },

    #[snafu(display("assertion failed: {message}"))]
    AssertionFailed { message: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cycle { .. }
            | Self::MissingInput { .. }
            | Self::UnknownVariable { .. }
            | Self::UnknownNode { .. }
            | Self::NotInGraph { .. }
            | Self::InputHasOwner { .. }
            | Self::DuplicateInput { .. }
            | Self::InvalidClient { .. }
            | Self::FeatureAlreadyAttached { .. }
            | Self::Corrupted { .. } => ErrorKind::Structure,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::Arity { .. }
            | Self::IncompatibleShapes { .. }
            | Self::NoCommonDType { .. }
            | Self::ReshapeSizeMismatch { .. }
            | Self::TypeInference { .. } => ErrorKind::TypeInference,
            Self::MultipleDestroyers { .. }
            | Self::DestroyedConstant { .. }
            | Self::DestroyedProtected { .. }
            | Self::SelfAliasedDestroy { .. }
            | Self::ReadAfterDestroy { .. }
            | Self::AliasingCycle { .. }
            | Self::MultipleViewInputs { .. }
            | Self::InvalidAliasMap { .. } => ErrorKind::AliasingConflict,
            Self::NotEvaluable { .. }
            | Self::ValueCount { .. }
            | Self::ValueTypeMismatch { .. }
            | Self::DataShapeMismatch { .. }
            | Self::AssertionFailed { .. } => ErrorKind::Evaluation,
        }
    }

    /// Fatal errors mean the graph can no longer be trusted. Everything else raised by a
    /// mutation has been rolled back by the time the caller sees it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}
