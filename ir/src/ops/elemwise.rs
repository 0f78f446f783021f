//! Broadcasting elementwise operations.

use std::fmt;

use graft_dtype::DType;
use smallvec::smallvec;
use snafu::{OptionExt, ensure};

use super::ScalarExpr;
use super::ScalarOp;
use super::check_arity;
use crate::error::{IncompatibleShapesSnafu, NoCommonDTypeSnafu, Result, TypeInferenceSnafu};
use crate::op::{AliasMap, IntoOpRef, Op, OpRef};
use crate::types::{Shape, TensorType};
use crate::value::{TensorData, broadcast_shapes};

/// Behaviour shared by [`Elemwise`] and [`Composite`]: a scalar expression broadcast over the
/// inputs, optionally writing the result into one of them.
pub trait Elementwise {
    fn expr(&self) -> ScalarExpr;

    fn nin(&self) -> usize;

    /// Input overwritten by the output, if the op runs in place.
    fn inplace(&self) -> Option<usize>;

    fn with_inplace(&self, input: Option<usize>) -> OpRef;
}

/// View an op as elementwise, if it is one.
pub fn as_elementwise(op: &dyn Op) -> Option<&dyn Elementwise> {
    if let Some(elemwise) = op.downcast_ref::<Elemwise>() {
        return Some(elemwise);
    }
    op.downcast_ref::<Composite>().map(|c| c as &dyn Elementwise)
}

/// Numpy broadcast of static shapes. Unknown dimensions are assumed not to be 1.
pub fn broadcast_types(op: &dyn Op, inputs: &[TensorType]) -> Result<Shape> {
    let ndim = inputs.iter().map(TensorType::ndim).max().unwrap_or(0);
    let mut shape: Shape = smallvec![Some(1); ndim];
    for ty in inputs {
        let offset = ndim - ty.ndim();
        for (d, &dim) in ty.shape().iter().enumerate() {
            shape[offset + d] = match (shape[offset + d], dim) {
                (Some(1), other) => other,
                (current, Some(1)) => current,
                (Some(a), Some(b)) if a == b => Some(a),
                (Some(_), Some(_)) => {
                    return IncompatibleShapesSnafu {
                        op: op.to_string(),
                        lhs: Box::new(TensorType::new(ty.dtype(), shape.clone())),
                        rhs: Box::new(ty.clone()),
                    }
                    .fail();
                }
                (Some(a), None) | (None, Some(a)) => Some(a),
                (None, None) => None,
            };
        }
    }
    Ok(shape)
}

fn elementwise_types(
    op: &dyn Op,
    nin: usize,
    out_dtype: Option<DType>,
    inplace: Option<usize>,
    inputs: &[TensorType],
) -> Result<Vec<TensorType>> {
    check_arity(op, inputs, nin)?;
    let dtype = out_dtype
        .context(NoCommonDTypeSnafu {
            op: op.to_string(),
            dtypes: inputs.iter().map(|t| t.dtype()).collect::<Vec<_>>(),
        })?;
    let out = TensorType::new(dtype, broadcast_types(op, inputs)?);
    if let Some(target) = inplace {
        let target = inputs
            .get(target)
            .context(TypeInferenceSnafu { op: op.to_string(), reason: format!("no input {target} to overwrite") })?;
        ensure!(
            *target == out,
            TypeInferenceSnafu { op: op.to_string(), reason: format!("cannot write {out} into {target}") }
        );
    }
    Ok(vec![out])
}

fn perform_elementwise(
    op: &dyn Op,
    dtype: DType,
    inputs: &[&TensorData],
    mut f: impl FnMut(&[f64]) -> f64,
) -> Result<Vec<TensorData>> {
    let shape = broadcast_shapes(inputs.iter().map(|d| d.shape()))
        .context(TypeInferenceSnafu { op: op.to_string(), reason: "operands cannot be broadcast" })?;
    let mut args = vec![0.0; inputs.len()];
    let out = TensorData::from_fn(dtype, &shape, |index| {
        for (arg, data) in args.iter_mut().zip(inputs) {
            *arg = data.broadcast_get(index);
        }
        f(&args)
    });
    Ok(vec![out])
}

fn inplace_destroy_map(inplace: Option<usize>) -> AliasMap {
    inplace.map(|input| AliasMap::from([(0, smallvec![input])])).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Elemwise {
    scalar: ScalarOp,
    inplace: Option<usize>,
}

impl Elemwise {
    pub fn new(scalar: ScalarOp) -> Self {
        Self { scalar, inplace: None }
    }

    pub fn scalar(&self) -> ScalarOp {
        self.scalar
    }
}

impl Elementwise for Elemwise {
    fn expr(&self) -> ScalarExpr {
        ScalarExpr::of(self.scalar)
    }

    fn nin(&self) -> usize {
        self.scalar.arity()
    }

    fn inplace(&self) -> Option<usize> {
        self.inplace
    }

    fn with_inplace(&self, input: Option<usize>) -> OpRef {
        Self { inplace: input, ..*self }.into_op()
    }
}

impl Op for Elemwise {
    fn family(&self) -> &'static str {
        "elemwise"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        let dtypes: Vec<_> = inputs.iter().map(TensorType::dtype).collect();
        elementwise_types(self, self.scalar.arity(), self.scalar.out_dtype(&dtypes), self.inplace, inputs)
    }

    fn destroy_map(&self) -> AliasMap {
        inplace_destroy_map(self.inplace)
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        let dtypes: Vec<_> = inputs.iter().map(|d| d.dtype()).collect();
        let dtype = self.scalar.out_dtype(&dtypes)?;
        Some(perform_elementwise(self, dtype, inputs, |args| self.scalar.eval(args)))
    }
}

impl fmt::Display for Elemwise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inplace {
            Some(input) => write!(f, "Elemwise{{{}, inplace={input}}}", self.scalar),
            None => write!(f, "Elemwise{{{}}}", self.scalar),
        }
    }
}

/// Several elementwise operations fused into one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Composite {
    expr: ScalarExpr,
    nin: usize,
    inplace: Option<usize>,
}

impl Composite {
    pub fn new(expr: ScalarExpr, nin: usize) -> Self {
        Self { expr, nin, inplace: None }
    }
}

impl Elementwise for Composite {
    fn expr(&self) -> ScalarExpr {
        self.expr.clone()
    }

    fn nin(&self) -> usize {
        self.nin
    }

    fn inplace(&self) -> Option<usize> {
        self.inplace
    }

    fn with_inplace(&self, input: Option<usize>) -> OpRef {
        Self { inplace: input, ..self.clone() }.into_op()
    }
}

impl Op for Composite {
    fn family(&self) -> &'static str {
        "elemwise"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        let dtypes: Vec<_> = inputs.iter().map(TensorType::dtype).collect();
        elementwise_types(self, self.nin, self.expr.dtype(&dtypes), self.inplace, inputs)
    }

    fn destroy_map(&self) -> AliasMap {
        inplace_destroy_map(self.inplace)
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        let dtypes: Vec<_> = inputs.iter().map(|d| d.dtype()).collect();
        let dtype = self.expr.dtype(&dtypes)?;
        Some(perform_elementwise(self, dtype, inputs, |args| self.expr.eval(args, &dtypes)))
    }
}

impl fmt::Display for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inplace {
            Some(input) => write!(f, "Composite{{{}, inplace={input}}}", self.expr),
            None => write!(f, "Composite{{{}}}", self.expr),
        }
    }
}
