//! Promotion and safe casting between element types.

use enumset::EnumSet;

use super::DType;

impl DType {
    /// Types this one promotes to directly. Integers reach the float twice their width,
    /// saturating at `Float64`.
    const fn widenings(self) -> &'static [Self] {
        use DType::*;
        match self {
            Bool => &[Int8, UInt8],
            Int8 => &[Int16, Float16],
            UInt8 => &[Int16, UInt16, Float16],
            Int16 => &[Int32, Float32],
            UInt16 => &[Int32, UInt32, Float32],
            Int32 => &[Int64, Float64],
            UInt32 => &[Int64, UInt64, Float64],
            Int64 | UInt64 => &[Float64],
            Float16 => &[Float32],
            Float32 => &[Float64],
            Float64 => &[],
        }
    }

    /// This type and everything it promotes to, transitively.
    pub fn supertypes(self) -> EnumSet<Self> {
        let mut seen = EnumSet::only(self);
        let mut pending = vec![self];
        while let Some(dtype) = pending.pop() {
            for &wider in dtype.widenings() {
                if seen.insert(wider) {
                    pending.push(wider);
                }
            }
        }
        seen
    }

    /// Whether `self` casts to `to` without leaving the promotion lattice.
    pub fn can_safe_cast(self, to: Self) -> bool {
        self.supertypes().contains(to)
    }

    /// Smallest type every one of `dtypes` promotes to, or `None` for an empty slice.
    pub fn least_upper_dtype(dtypes: &[Self]) -> Option<Self> {
        let (first, rest) = dtypes.split_first()?;
        let common = rest.iter().fold(first.supertypes(), |common, dtype| common & dtype.supertypes());
        common.iter().min()
    }
}
