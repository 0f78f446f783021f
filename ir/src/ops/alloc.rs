use std::fmt;

use itertools::Itertools;
use smallvec::SmallVec;
use snafu::ensure;

use super::check_arity;
use crate::error::{Result, TypeInferenceSnafu};
use crate::graph::{ApplyId, Client, FunctionGraph};
use crate::op::{Op, destroyed_inputs};
use crate::types::TensorType;
use crate::value::{TensorData, broadcast_shapes};

/// Fresh buffer of a static shape filled by broadcasting the input value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Alloc {
    shape: SmallVec<[usize; 4]>,
}

impl Alloc {
    pub fn new(shape: &[usize]) -> Self {
        Self { shape: shape.into() }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl Op for Alloc {
    fn family(&self) -> &'static str {
        "alloc"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        let value = &inputs[0];
        let offset = self.shape.len().checked_sub(value.ndim());
        let fits = offset.is_some_and(|offset| {
            value
                .shape()
                .iter()
                .enumerate()
                .all(|(d, dim)| dim.is_none_or(|dim| dim == 1 || dim == self.shape[offset + d]))
        });
        ensure!(
            fits,
            TypeInferenceSnafu { op: self.to_string(), reason: format!("cannot broadcast {value} to {:?}", self.shape) }
        );
        Ok(vec![TensorType::fixed(value.dtype(), &self.shape)])
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        let value = inputs.first()?;
        if broadcast_shapes([self.shape.as_slice(), value.shape()]).as_deref() != Some(self.shape.as_slice()) {
            let reason = format!("cannot broadcast {:?} to {:?}", value.shape(), self.shape);
            return Some(TypeInferenceSnafu { op: self.to_string(), reason }.fail());
        }
        Some(Ok(vec![TensorData::from_fn(value.dtype(), &self.shape, |index| value.broadcast_get(index))]))
    }

    /// Folding would turn the buffer into a shared constant, which is wrong when someone
    /// writes into it or the caller receives it. Elementwise readers broadcast the fill
    /// anyway, so folding for them would only materialize it.
    fn do_constant_folding(&self, fgraph: &FunctionGraph, node: ApplyId) -> bool {
        let Some(&output) = fgraph.node(node).outputs().first() else {
            return true;
        };
        !fgraph.clients(output).iter().any(|client| match *client {
            Client::Output { .. } => true,
            Client::Node { node: consumer, index } => {
                let op = fgraph.node(consumer).op();
                matches!(op.family(), "inc_subtensor" | "elemwise" | "composite")
                    || destroyed_inputs(op.as_ref()).contains(&index)
            }
        })
    }
}

impl fmt::Display for Alloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alloc{{({})}}", self.shape.iter().join(", "))
    }
}
