//! Graph rewriting for graft.
//!
//! Rewrites are registered in a [`RewriteDb`] under a name, a set of tags and a position. A
//! [`Query`] (usually derived from an [`OptLevel`]) selects the entries that apply and orders
//! them into a [`PassList`], which the [`Driver`] runs over a
//! [`FunctionGraph`](graft_ir::FunctionGraph) until each pass reaches its fixed point.
//!
//! # Module Organization
//!
//! - [`rewriter`] - local and global rewrite traits
//! - [`query`] - tag queries over database entries
//! - [`db`] - the rewrite database and the pass lists it produces
//! - [`levels`] - named optimization levels
//! - [`config`] - rewrite configuration (builder and environment)
//! - [`driver`] - pass execution and equilibrium work-lists
//! - [`report`] - per-pass statistics
//! - [`catalog`] - the standard rewrites and the standard database [`OPTDB`]
//! - [`compile`] - the compile pipeline from a user graph to a [`CompiledGraph`]

pub mod catalog;
pub mod compile;
pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod levels;
pub mod query;
pub mod report;
pub mod rewriter;


pub use catalog::{OPTDB, build_standard_db};
pub use compile::{CompiledGraph, In, Out, compile, compile_with};
pub use config::{OnUnusedInput, RewriteConfig};
pub use db::{Pass, PassList, Rewrite, RewriteDb};
pub use driver::{Driver, rewrite_graph};
pub use error::{Error, Result};
pub use levels::OptLevel;
pub use query::Query;
pub use report::{PassKind, PassStats, RewriteReport, SkippedRewrite};
pub use rewriter::{GraphRewriter, NodeRewriter, RewriteContext, node_rewriter};
