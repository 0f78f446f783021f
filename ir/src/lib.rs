//! Intermediate representation for graft.
//!
//! A computation is a DAG of [`graph::Apply`] nodes (one application of an [`op::Op`])
//! connected through typed [`graph::Variable`]s. Nodes live in a [`graph::NodeArena`]; a
//! [`graph::FunctionGraph`] owns an arena and tracks which nodes are members of the graph,
//! who consumes each variable, and which [`graph::Feature`]s observe its mutations.
//!
//! # Module Organization
//!
//! - [`types`] - tensor types (dtype + partially known static shape)
//! - [`value`] - dense tensor literals used for constants and evaluation
//! - [`op`] - the `Op` capability trait and alias maps
//! - [`graph`] - arena, function graph, features, toposort
//! - [`destroy`] - in-place legality (destroy handler feature)
//! - [`supervisor`] - protection of inputs and outputs against destruction
//! - [`alias`] - storage aliasing analysis
//! - [`ops`] - reference operation set
//! - [`eval`] - reference evaluator
//! - [`provenance`] - replacement history of variables

pub mod alias;
pub mod destroy;
pub mod error;
pub mod eval;
pub mod graph;
pub mod op;
pub mod ops;
pub mod prelude;
pub mod provenance;
pub mod supervisor;
pub mod types;
pub mod value;


pub use destroy::DestroyHandler;
pub use error::{Error, ErrorKind, Result};
pub use graph::{Apply, ApplyId, Change, Client, Feature, FunctionGraph, NodeArena, VarId, Variable};
pub use op::{AliasMap, IntoOpRef, Op, OpRef};
pub use supervisor::Supervisor;
pub use types::TensorType;
pub use value::TensorData;

pub use graft_dtype::DType;
