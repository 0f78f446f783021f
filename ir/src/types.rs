use std::fmt;

use graft_dtype::DType;
use smallvec::SmallVec;

use crate::value::TensorData;

pub type Shape = SmallVec<[Option<usize>; 4]>;

/// Static type of a [`Variable`](crate::graph::Variable): element dtype plus a shape whose
/// dimensions may be unknown (`None`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    dtype: DType,
    shape: Shape,
}

impl TensorType {
    pub fn new(dtype: DType, shape: impl IntoIterator<Item = Option<usize>>) -> Self {
        Self { dtype, shape: shape.into_iter().collect() }
    }

    /// 0-d tensor.
    pub fn scalar(dtype: DType) -> Self {
        Self { dtype, shape: Shape::new() }
    }

    /// Tensor with every dimension known.
    pub fn fixed(dtype: DType, dims: &[usize]) -> Self {
        Self::new(dtype, dims.iter().map(|&d| Some(d)))
    }

    /// Tensor of the given rank with every dimension unknown.
    pub fn dynamic(dtype: DType, ndim: usize) -> Self {
        Self::new(dtype, std::iter::repeat_n(None, ndim))
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[Option<usize>] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self { dtype, shape: self.shape.clone() }
    }

    /// Dimensions statically known to be 1.
    pub fn broadcastable(&self) -> SmallVec<[bool; 4]> {
        self.shape.iter().map(|d| *d == Some(1)).collect()
    }

    /// Concrete shape, if every dimension is known.
    pub fn static_shape(&self) -> Option<SmallVec<[usize; 4]>> {
        self.shape.iter().copied().collect()
    }

    /// Number of elements, if every dimension is known.
    pub fn static_size(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, d| d.map(|d| acc * d))
    }

    /// Whether every value of `other` is also a valid value of `self`.
    ///
    /// Same dtype and rank; each dimension known in `self` must be equally known in `other`.
    pub fn is_super(&self, other: &TensorType) -> bool {
        self.dtype == other.dtype
            && self.ndim() == other.ndim()
            && self.shape.iter().zip(&other.shape).all(|(s, o)| s.is_none() || s == o)
    }

    /// Same dtype and the same broadcastable pattern.
    pub fn in_same_class(&self, other: &TensorType) -> bool {
        self.dtype == other.dtype && self.broadcastable() == other.broadcastable()
    }

    /// The more specific of two compatible types, or `None` when they contradict.
    pub fn refine(&self, other: &TensorType) -> Option<TensorType> {
        if self.dtype != other.dtype || self.ndim() != other.ndim() {
            return None;
        }
        let shape = self
            .shape
            .iter()
            .zip(&other.shape)
            .map(|(a, b)| match (a, b) {
                (Some(x), Some(y)) if x != y => Err(()),
                (Some(x), _) | (_, Some(x)) => Ok(Some(*x)),
                (None, None) => Ok(None),
            })
            .collect::<Result<Shape, ()>>()
            .ok()?;
        Some(Self { dtype: self.dtype, shape })
    }

    /// Whether a concrete value inhabits this type.
    pub fn accepts(&self, data: &TensorData) -> bool {
        data.dtype() == self.dtype
            && data.shape().len() == self.ndim()
            && self.shape.iter().zip(data.shape()).all(|(s, d)| s.is_none_or(|s| s == *d))
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match dim {
                Some(d) => write!(f, "{d}")?,
                None => write!(f, "?")?,
            }
        }
        write!(f, "]")
    }
}
