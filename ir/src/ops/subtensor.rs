//! Basic (static slice) indexing and its increment/set counterpart.

use std::fmt;

use itertools::Itertools;
use smallvec::{SmallVec, smallvec};
use snafu::ensure;

use super::check_arity;
use crate::error::{Result, TypeInferenceSnafu};
use crate::op::{AliasMap, Op};
use crate::types::TensorType;
use crate::value::{Dims, TensorData, broadcast_shapes};

/// Half-open range `start..stop` along one leading dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{start}:{stop}")]
pub struct Slice {
    pub start: usize,
    pub stop: usize,
}

impl Slice {
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    pub fn len(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.stop).contains(&index)
    }

    pub fn overlaps(&self, other: &Slice) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.stop && other.start < self.stop
    }
}

pub type Slices = SmallVec<[Slice; 4]>;

fn sliced_type(op: &dyn Op, x: &TensorType, slices: &[Slice]) -> Result<TensorType> {
    ensure!(
        slices.len() <= x.ndim(),
        TypeInferenceSnafu { op: op.to_string(), reason: format!("{} slices for a {}-d input", slices.len(), x.ndim()) }
    );
    for (slice, dim) in slices.iter().zip(x.shape()) {
        ensure!(
            slice.start <= slice.stop && dim.is_none_or(|dim| slice.stop <= dim),
            TypeInferenceSnafu { op: op.to_string(), reason: format!("slice {slice} out of bounds for {x}") }
        );
    }
    let shape = slices.iter().map(|s| Some(s.len())).chain(x.shape()[slices.len()..].iter().copied());
    Ok(TensorType::new(x.dtype(), shape))
}

/// Concrete shape of the selected region, checking runtime bounds.
fn region_shape(op: &dyn Op, x: &TensorData, slices: &[Slice]) -> Result<Dims> {
    ensure!(
        slices.len() <= x.ndim() && slices.iter().zip(x.shape()).all(|(s, d)| s.start <= s.stop && s.stop <= *d),
        TypeInferenceSnafu { op: op.to_string(), reason: format!("slices out of bounds for shape {:?}", x.shape()) }
    );
    Ok(slices.iter().map(Slice::len).chain(x.shape()[slices.len()..].iter().copied()).collect())
}

/// `x[slices]`, a view of `x`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subtensor {
    slices: Slices,
}

impl Subtensor {
    pub fn new(slices: &[Slice]) -> Self {
        Self { slices: slices.into() }
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }
}

impl Op for Subtensor {
    fn family(&self) -> &'static str {
        "subtensor"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 1)?;
        Ok(vec![sliced_type(self, &inputs[0], &self.slices)?])
    }

    fn view_map(&self) -> AliasMap {
        AliasMap::from([(0, smallvec![0])])
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        let x = inputs.first()?;
        Some(region_shape(self, x, &self.slices).map(|shape| {
            let out = TensorData::from_fn(x.dtype(), &shape, |index| {
                let source: Dims =
                    index.iter().enumerate().map(|(d, i)| i + self.slices.get(d).map_or(0, |s| s.start)).collect();
                x.get(&source).unwrap_or(f64::NAN)
            });
            vec![out]
        }))
    }
}

impl fmt::Display for Subtensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subtensor{{{}}}", self.slices.iter().join(", "))
    }
}

/// `x[slices] += y` (or `= y`), returning the updated `x`.
///
/// Out of place the output is a fresh copy; in place it overwrites input 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncSubtensor {
    slices: Slices,
    set_instead_of_inc: bool,
    inplace: bool,
}

impl IncSubtensor {
    pub fn inc(slices: &[Slice]) -> Self {
        Self { slices: slices.into(), set_instead_of_inc: false, inplace: false }
    }

    pub fn set(slices: &[Slice]) -> Self {
        Self { slices: slices.into(), set_instead_of_inc: true, inplace: false }
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn is_set(&self) -> bool {
        self.set_instead_of_inc
    }

    pub fn is_inplace(&self) -> bool {
        self.inplace
    }

    pub fn with_inplace(&self, inplace: bool) -> Self {
        Self { inplace, ..self.clone() }
    }

    /// Whether the two updated regions cannot share an element.
    pub fn disjoint(&self, other: &IncSubtensor) -> bool {
        self.slices.iter().chain(&other.slices).any(Slice::is_empty)
            || self.slices.iter().zip(&other.slices).any(|(a, b)| !a.overlaps(b))
    }
}

impl Op for IncSubtensor {
    fn family(&self) -> &'static str {
        "inc_subtensor"
    }

    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>> {
        check_arity(self, inputs, 2)?;
        let (x, y) = (&inputs[0], &inputs[1]);
        let region = sliced_type(self, x, &self.slices)?;
        ensure!(
            y.dtype().can_safe_cast(x.dtype()),
            TypeInferenceSnafu { op: self.to_string(), reason: format!("cannot cast {} into {}", y.dtype(), x.dtype()) }
        );
        let offset = region.ndim().checked_sub(y.ndim());
        let fits = offset.is_some_and(|offset| {
            y.shape().iter().enumerate().all(|(d, dim)| match (dim, region.shape()[offset + d]) {
                (Some(1), _) | (None, _) | (_, None) => true,
                (Some(a), Some(b)) => *a == b,
            })
        });
        ensure!(
            fits,
            TypeInferenceSnafu { op: self.to_string(), reason: format!("cannot broadcast {y} into {region}") }
        );
        Ok(vec![x.clone()])
    }

    fn destroy_map(&self) -> AliasMap {
        if self.inplace { AliasMap::from([(0, smallvec![0])]) } else { AliasMap::new() }
    }

    fn perform(&self, inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        let (x, y) = (inputs.first()?, inputs.get(1)?);
        let region = match region_shape(self, x, &self.slices) {
            Ok(region) => region,
            Err(error) => return Some(Err(error)),
        };
        if broadcast_shapes([region.as_slice(), y.shape()]).as_deref() != Some(region.as_slice()) {
            let reason = format!("cannot broadcast {:?} into {:?}", y.shape(), region.as_slice());
            return Some(TypeInferenceSnafu { op: self.to_string(), reason }.fail());
        }
        let out = TensorData::from_fn(x.dtype(), x.shape(), |index| {
            let current = x.get(index).unwrap_or(f64::NAN);
            let inside = self.slices.iter().zip(index).all(|(s, i)| s.contains(*i));
            if !inside {
                return current;
            }
            let relative: Dims =
                index.iter().enumerate().map(|(d, i)| i - self.slices.get(d).map_or(0, |s| s.start)).collect();
            let update = y.broadcast_get(&relative);
            if self.set_instead_of_inc { update } else { current + update }
        });
        Some(Ok(vec![out]))
    }
}

impl fmt::Display for IncSubtensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.set_instead_of_inc { "SetSubtensor" } else { "IncSubtensor" };
        write!(f, "{name}{{{}}}", self.slices.iter().join(", "))?;
        if self.inplace {
            write!(f, "[inplace]")?;
        }
        Ok(())
    }
}
