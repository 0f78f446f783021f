//! Named optimization levels.

use std::str::FromStr;

use crate::error::{Result, UnknownOptLevelSnafu};
use crate::query::Query;

/// Position cutoff of [`OptLevel::Stabilization`]: everything up to and including the
/// `stabilize` group at 1.5.
pub const STABILIZATION_CUTOFF: f64 = 1.5000001;

/// Predefined rewrite schedules, from nothing at all to every safe rewrite.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OptLevel {
    /// No rewrites.
    None,
    /// Only merging of duplicate constants and nodes.
    Merge,
    /// Cheap rewrites, for fast compilation.
    #[strum(to_string = "o1", serialize = "fast_compile")]
    O1,
    /// `o1` plus elementwise fusion.
    #[strum(to_string = "o2")]
    O2,
    /// Every `fast_run` rewrite except in-place ones.
    #[strum(to_string = "o3")]
    O3,
    /// Every `fast_run` rewrite.
    #[default]
    #[strum(to_string = "o4", serialize = "fast_run")]
    O4,
    /// Canonicalization and numerical stabilization only.
    Stabilization,
    /// `o3` plus rewrites that may change results on invalid input.
    Unsafe,
}

impl OptLevel {
    /// Parse a level name (case-insensitive), reporting unknown names as
    /// [`Error::UnknownOptLevel`](crate::Error::UnknownOptLevel).
    pub fn from_name(name: &str) -> Result<Self> {
        <Self as FromStr>::from_str(name.trim()).map_err(|_| UnknownOptLevelSnafu { name }.build())
    }

    /// The database query selecting this level's rewrites.
    pub fn query(self) -> Query {
        match self {
            Self::None => Query::new(),
            Self::Merge => Query::new().including(["merge"]),
            Self::O1 => Query::new().including(["fast_compile"]),
            Self::O2 => Query::new().including(["fast_compile", "fusion"]),
            Self::O3 => Query::new().including(["fast_run"]).excluding(["inplace"]),
            Self::O4 => Query::new().including(["fast_run"]),
            Self::Stabilization => Query::new().including(["fast_run"]).with_position_cutoff(STABILIZATION_CUTOFF),
            Self::Unsafe => Query::new().including(["fast_run", "unsafe"]).excluding(["inplace"]),
        }
    }
}

