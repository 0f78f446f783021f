//! Rewrite configuration.
//!
//! Built explicitly with a bon builder, or read from environment variables.

use std::str::FromStr;

use bon::bon;
use tracing::warn;

use crate::error::{InvalidConfigSnafu, Result};
use crate::levels::OptLevel;
use crate::query::Query;

pub const DEFAULT_MAX_USE_RATIO: f64 = 8.0;
pub const DEFAULT_MAX_GLOBAL_ITERATIONS: usize = 16;

// ============================================================================
// UNUSED INPUTS
// ============================================================================

/// What compilation does with inputs the outputs do not depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OnUnusedInput {
    /// Fail with [`Error::UnusedInput`](crate::Error::UnusedInput).
    #[default]
    Raise,
    /// Log a warning and continue.
    Warn,
    Ignore,
}

// ============================================================================
// REWRITE CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RewriteConfig {
    pub opt_level: OptLevel,
    /// Add rewrites tagged `unsafe` to whatever the level selects.
    pub unsafe_rewrites: bool,
    /// Equilibrium passes stop after `max_use_ratio * nodes` successful rewrites.
    pub max_use_ratio: f64,
    /// Upper bound on repetitions of a global pass.
    pub max_global_iterations: usize,
    pub on_unused_input: OnUnusedInput,
    /// Accept graphs that already contain in-place nodes.
    pub accept_inplace: bool,
    /// Merged into the level's query, e.g. to exclude a single rewrite by name.
    pub extra: Query,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            unsafe_rewrites: false,
            max_use_ratio: DEFAULT_MAX_USE_RATIO,
            max_global_iterations: DEFAULT_MAX_GLOBAL_ITERATIONS,
            on_unused_input: OnUnusedInput::default(),
            accept_inplace: false,
            extra: Query::new(),
        }
    }
}

#[bon]
impl RewriteConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] opt_level: OptLevel,
        #[builder(default = false)] unsafe_rewrites: bool,
        #[builder(default = DEFAULT_MAX_USE_RATIO)] max_use_ratio: f64,
        #[builder(default = DEFAULT_MAX_GLOBAL_ITERATIONS)] max_global_iterations: usize,
        #[builder(default)] on_unused_input: OnUnusedInput,
        #[builder(default = false)] accept_inplace: bool,
        #[builder(default)] extra: Query,
    ) -> Self {
        Self {
            opt_level,
            unsafe_rewrites,
            max_use_ratio,
            max_global_iterations,
            on_unused_input,
            accept_inplace,
            extra,
        }
    }

    /// Create configuration from environment variables, falling back to the default for
    /// every variable that is unset or does not parse.
    ///
    /// # Environment Variables
    ///
    /// * `GRAFT_OPT_LEVEL` - `none`, `merge`, `o1`..`o4`, `stabilization` or `unsafe` (default: `o4`)
    /// * `GRAFT_UNSAFE` - `1`/`true` to add unsafe rewrites
    /// * `GRAFT_MAX_USE_RATIO` - equilibrium budget per node (default: 8)
    /// * `GRAFT_MAX_GLOBAL_ITERATIONS` - global pass repetitions (default: 16)
    /// * `GRAFT_ON_UNUSED_INPUT` - `raise`, `warn` or `ignore` (default: `raise`)
    /// * `GRAFT_ACCEPT_INPLACE` - `1`/`true` to accept in-place input graphs
    /// * `GRAFT_QUERY` - extra tag expression, e.g. `-fusion`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], but fails on the first malformed variable.
    pub fn try_from_env() -> Result<Self> {
        Self::try_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Reader { lookup, strict: false }.read().unwrap_or_default()
    }

    pub fn try_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Reader { lookup, strict: true }.read()
    }

    /// The database query this configuration selects.
    pub fn query(&self) -> Query {
        let mut query = self.opt_level.query();
        if self.unsafe_rewrites {
            query = query.including(["unsafe"]);
        }
        query.merge(&self.extra)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_ratio(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|ratio| ratio.is_finite() && *ratio > 0.0)
}

struct Reader<F> {
    lookup: F,
    strict: bool,
}

impl<F: Fn(&str) -> Option<String>> Reader<F> {
    fn read(&self) -> Result<RewriteConfig> {
        let defaults = RewriteConfig::default();
        Ok(RewriteConfig {
            opt_level: self.get("GRAFT_OPT_LEVEL", defaults.opt_level, |v| OptLevel::from_name(v).ok())?,
            unsafe_rewrites: self.get("GRAFT_UNSAFE", defaults.unsafe_rewrites, parse_flag)?,
            max_use_ratio: self.get("GRAFT_MAX_USE_RATIO", defaults.max_use_ratio, parse_ratio)?,
            max_global_iterations: self.get("GRAFT_MAX_GLOBAL_ITERATIONS", defaults.max_global_iterations, |v| {
                v.trim().parse().ok()
            })?,
            on_unused_input: self.get("GRAFT_ON_UNUSED_INPUT", defaults.on_unused_input, |v| {
                OnUnusedInput::from_str(v.trim()).ok()
            })?,
            accept_inplace: self.get("GRAFT_ACCEPT_INPLACE", defaults.accept_inplace, parse_flag)?,
            extra: self.get("GRAFT_QUERY", defaults.extra, |v| Query::from_str(v).ok())?,
        })
    }

    fn get<T>(&self, key: &'static str, default: T, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
        let Some(value) = (self.lookup)(key) else {
            return Ok(default);
        };
        match parse(&value) {
            Some(parsed) => Ok(parsed),
            None if self.strict => InvalidConfigSnafu { key, value }.fail(),
            None => {
                warn!(key, %value, "ignoring malformed configuration variable");
                Ok(default)
            }
        }
    }
}

impl From<OptLevel> for RewriteConfig {
    fn from(opt_level: OptLevel) -> Self {
        Self { opt_level, ..Self::default() }
    }
}
