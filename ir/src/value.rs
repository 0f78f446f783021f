use std::fmt;
use std::hash::{Hash, Hasher};

use graft_dtype::DType;
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::{DataShapeMismatchSnafu, Result};
use crate::types::TensorType;

pub type Dims = SmallVec<[usize; 4]>;

/// Dense tensor literal.
///
/// Values are stored as `f64` already normalized into the dtype's domain, so integer and
/// boolean tensors hold exact values. Equality and hashing are bitwise, which keeps `NaN`
/// constants mergeable and `0.0`/`-0.0` distinct.
#[derive(Debug, Clone)]
pub struct TensorData {
    dtype: DType,
    shape: Dims,
    values: Vec<f64>,
}

impl TensorData {
    pub fn new(dtype: DType, shape: &[usize], values: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        ensure!(values.len() == expected, DataShapeMismatchSnafu { len: values.len(), shape: shape.to_vec() });
        let values = values.into_iter().map(|v| dtype.normalize(v)).collect();
        Ok(Self { dtype, shape: shape.into(), values })
    }

    pub fn scalar(dtype: DType, value: f64) -> Self {
        Self { dtype, shape: Dims::new(), values: vec![dtype.normalize(value)] }
    }

    pub fn filled(dtype: DType, shape: &[usize], value: f64) -> Self {
        let size = shape.iter().product();
        Self { dtype, shape: shape.into(), values: vec![dtype.normalize(value); size] }
    }

    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        Self::filled(dtype, shape, 0.0)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn tensor_type(&self) -> TensorType {
        TensorType::fixed(self.dtype, &self.shape)
    }

    /// The single element of a size-1 tensor.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.values.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }

    /// Whether every element equals `value`. Empty tensors never qualify.
    pub fn all_equal(&self, value: f64) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| *v == value)
    }

    /// Whether every element is truthy (non-zero).
    pub fn all_true(&self) -> bool {
        self.values.iter().all(|v| *v != 0.0)
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        Self::new(self.dtype, shape, self.values.clone())
    }

    pub fn cast(&self, dtype: DType) -> Self {
        Self { dtype, shape: self.shape.clone(), values: self.values.iter().map(|v| dtype.normalize(*v)).collect() }
    }

    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.ndim() || index.iter().zip(&self.shape).any(|(i, d)| i >= d) {
            return None;
        }
        self.values.get(ravel(index, &strides(&self.shape))).copied()
    }

    /// Build a tensor of `shape` by evaluating `f` at every multi-index in row-major order.
    pub fn from_fn(dtype: DType, shape: &[usize], mut f: impl FnMut(&[usize]) -> f64) -> Self {
        let size: usize = shape.iter().product();
        let mut values = Vec::with_capacity(size);
        let mut index: Dims = smallvec::smallvec![0; shape.len()];
        for _ in 0..size {
            values.push(dtype.normalize(f(&index)));
            increment(&mut index, shape);
        }
        Self { dtype, shape: shape.into(), values }
    }

    /// Value at `index` of the broadcast of `self` to a larger shape (numpy rules).
    pub fn broadcast_get(&self, index: &[usize]) -> f64 {
        let offset = index.len() - self.ndim();
        let strides = strides(&self.shape);
        let flat = self
            .shape
            .iter()
            .zip(&strides)
            .enumerate()
            .map(|(d, (dim, stride))| if *dim == 1 { 0 } else { index[offset + d] * stride })
            .sum::<usize>();
        self.values[flat]
    }

    /// Element-wise comparison with relative and absolute tolerance. `NaN` equals `NaN`.
    pub fn approx_eq(&self, other: &TensorData, rtol: f64, atol: f64) -> bool {
        self.shape == other.shape
            && self.values.iter().zip(&other.values).all(|(a, b)| {
                (a.is_nan() && b.is_nan()) || a == b || (a - b).abs() <= atol + rtol * b.abs()
            })
    }
}

impl PartialEq for TensorData {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.shape == other.shape
            && self.values.iter().zip(&other.values).all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for TensorData {}

impl Hash for TensorData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dtype.hash(state);
        self.shape.hash(state);
        for v in &self.values {
            v.to_bits().hash(state);
        }
    }
}

impl fmt::Display for TensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_scalar() {
            Some(v) if self.ndim() == 0 => write!(f, "{v}"),
            _ if self.size() <= 8 => write!(f, "{:?}{:?}", self.values, self.shape.as_slice()),
            _ => write!(f, "<{} {:?}>", self.dtype, self.shape.as_slice()),
        }
    }
}

/// Row-major strides of a concrete shape.
pub fn strides(shape: &[usize]) -> Dims {
    let mut strides: Dims = smallvec::smallvec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

pub fn ravel(index: &[usize], strides: &[usize]) -> usize {
    index.iter().zip(strides).map(|(i, s)| i * s).sum()
}

/// Advance a row-major multi-index by one position.
fn increment(index: &mut [usize], shape: &[usize]) {
    for d in (0..index.len()).rev() {
        index[d] += 1;
        if index[d] < shape[d] {
            return;
        }
        index[d] = 0;
    }
}

/// Numpy broadcast of concrete shapes, aligned from the right.
pub fn broadcast_shapes<'a>(shapes: impl IntoIterator<Item = &'a [usize]>) -> Option<Dims> {
    let mut out = Dims::new();
    for shape in shapes {
        if shape.len() > out.len() {
            let mut grown: Dims = smallvec::smallvec![1; shape.len() - out.len()];
            grown.extend_from_slice(&out);
            out = grown;
        }
        let offset = out.len() - shape.len();
        for (d, &dim) in shape.iter().enumerate() {
            let slot = &mut out[offset + d];
            match (*slot, dim) {
                (a, b) if a == b => {}
                (1, b) => *slot = b,
                (_, 1) => {}
                _ => return None,
            }
        }
    }
    Some(out)
}
