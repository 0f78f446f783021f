use smallvec::smallvec;
use snafu::ensure;

use super::check_arity;
use crate::error::{AritySnafu, AssertionFailedSnafu, Result};
use crate::op::{AliasMap, Op};
use crate::types::TensorType;
use crate::value::TensorData;

/// Copy into a fresh buffer. Used to break aliasing between graph outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("DeepCopy")]
pub struct DeepCopy;

impl Op for DeepCopy {
    fn family(&self) -> &'static str {
        "deep_copy"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        Ok(vec![inputs[0].clone()])
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        Some(Ok(vec![(*inputs.first()?).clone()]))
    }
}

/// Identity that returns a view of its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("ViewOp")]
pub struct ViewOp;

impl Op for ViewOp {
    fn family(&self) -> &'static str {
        "view"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        Ok(vec![inputs[0].clone()])
    }

    fn view_map(&self) -> AliasMap {
        AliasMap::from([(0, smallvec![0])])
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        Some(Ok(vec![(*inputs.first()?).clone()]))
    }
}

/// `assert(x, cond...)`: returns (a view of) `x` once every condition holds element-wise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
#[display("Assert{{{message:?}}}")]
pub struct Assert {
    message: String,
}

impl Assert {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Op for Assert {
    fn family(&self) -> &'static str {
        "assert"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        ensure!(!inputs.is_empty(), AritySnafu { op: self.to_string(), expected: 1usize, actual: 0usize });
        Ok(vec![inputs[0].clone()])
    }

    fn view_map(&self) -> AliasMap {
        AliasMap::from([(0, smallvec![0])])
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        let (x, conditions) = inputs.split_first()?;
        if conditions.iter().any(|c| !c.all_true()) {
            return Some(AssertionFailedSnafu { message: self.message.clone() }.fail());
        }
        Some(Ok(vec![(*x).clone()]))
    }
}
