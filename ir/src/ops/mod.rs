//! Reference operation set.
//!
//! Dense `f64`-backed implementations used to give rewrites something concrete to match and
//! to check that rewritten graphs compute the same values. Not a performance backend.

mod alloc;
mod elemwise;
mod misc;
mod scalar;
mod shape;
mod subtensor;

pub use alloc::Alloc;
pub use elemwise::{Composite, Elemwise, Elementwise, as_elementwise, broadcast_types};
pub use misc::{Assert, DeepCopy, ViewOp};
pub use scalar::{ScalarExpr, ScalarOp};
pub use shape::Reshape;
pub use subtensor::{IncSubtensor, Slice, Slices, Subtensor};

use snafu::ensure;

use crate::error::{AritySnafu, Result};
use crate::op::Op;
use crate::types::TensorType;

pub(crate) fn check_arity(op: &dyn Op, inputs: &[TensorType], expected: usize) -> Result<()> {
    ensure!(inputs.len() == expected, AritySnafu { op: op.to_string(), expected, actual: inputs.len() });
    Ok(())
}
