//! Element types for tensor graphs.
//!
//! A [`DType`] describes the scalar element of a tensor. Graph types
//! (`graft_ir::types::TensorType`) pair a dtype with a static shape.

pub mod cast;


/// Scalar element type.
///
/// Discriminant order encodes promotion priority: lower = more specific.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter, strum::IntoStaticStr)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(any(test, feature = "proptest"), derive(proptest_derive::Arbitrary))]
#[strum(serialize_all = "lowercase")]
#[enumset(repr = "u32")]
pub enum DType {
    Bool = 0,

    // Interleaved signed/unsigned for correct LUB priority
    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 7,
    UInt64 = 8,

    Float16 = 9,
    Float32 = 10,
    Float64 = 11,
}

impl DType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    /// Smallest float type that holds every value of this dtype exactly,
    /// saturating at `Float64`.
    pub const fn to_float(&self) -> Self {
        match self {
            Self::Float16 | Self::Float32 | Self::Float64 => *self,
            Self::Bool | Self::Int8 | Self::UInt8 => Self::Float16,
            Self::Int16 | Self::UInt16 => Self::Float32,
            _ => Self::Float64,
        }
    }

    /// Normalize a raw `f64` into the value domain of this dtype.
    ///
    /// Integers truncate toward zero and saturate at the type bounds, booleans collapse to
    /// 0/1, floats are kept as-is (`Float16`/`Float32` round through `f32`).
    pub fn normalize(&self, value: f64) -> f64 {
        match self {
            Self::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int8 => value as i8 as f64,
            Self::Int16 => value as i16 as f64,
            Self::Int32 => value as i32 as f64,
            Self::Int64 => value as i64 as f64,
            Self::UInt8 => value as u8 as f64,
            Self::UInt16 => value as u16 as f64,
            Self::UInt32 => value as u32 as f64,
            Self::UInt64 => value as u64 as f64,
            Self::Float16 | Self::Float32 => value as f32 as f64,
            Self::Float64 => value,
        }
    }
}
