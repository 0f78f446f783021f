//! Common imports for building and inspecting graphs.
//!
//! ```rust,ignore
//! use graft_ir::prelude::*;
//! ```

pub use crate::graph::{Apply, ApplyId, Client, FunctionGraph, NodeArena, VarId, Variable};
pub use crate::op::{IntoOpRef, Op, OpRef};
pub use crate::ops::{
    Alloc, Assert, Composite, DeepCopy, Elemwise, IncSubtensor, Reshape, ScalarExpr, ScalarOp, Slice, Subtensor,
    ViewOp,
};
pub use crate::types::TensorType;
pub use crate::value::TensorData;
pub use crate::{DestroyHandler, Supervisor};

pub use graft_dtype::DType;
