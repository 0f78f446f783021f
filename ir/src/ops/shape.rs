use std::fmt;

use itertools::Itertools;
use smallvec::{SmallVec, smallvec};
use snafu::ensure;

use super::check_arity;
use crate::error::{ReshapeSizeMismatchSnafu, Result};
use crate::op::{AliasMap, Op};
use crate::types::TensorType;
use crate::value::TensorData;

/// Reshape to a static target shape. The output views the input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reshape {
    shape: SmallVec<[usize; 4]>,
}

impl Reshape {
    pub fn new(shape: &[usize]) -> Self {
        Self { shape: shape.into() }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl Op for Reshape {
    fn family(&self) -> &'static str {
        "reshape"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        let output_size = self.shape.iter().product();
        if let Some(input_size) = inputs[0].static_size() {
            ensure!(input_size == output_size, ReshapeSizeMismatchSnafu { input_size, output_size });
        }
        Ok(vec![TensorType::fixed(inputs[0].dtype(), &self.shape)])
    }

    fn view_map(&self) -> AliasMap {
        AliasMap::from([(0, smallvec![0])])
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        let input = inputs.first()?;
        let output_size: usize = self.shape.iter().product();
        if input.size() != output_size {
            return Some(ReshapeSizeMismatchSnafu { input_size: input.size(), output_size }.fail());
        }
        Some(input.reshape(&self.shape).map(|out| vec![out]))
    }
}

impl fmt::Display for Reshape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reshape{{({})}}", self.shape.iter().join(", "))
    }
}
