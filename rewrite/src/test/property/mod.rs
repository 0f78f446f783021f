//! Property-based tests for the standard rewrites and the driver.
//!
//! Random elementwise graphs go through the optimization levels; the rewritten graph must
//! stay consistent and compute what the original computed.

#[cfg(test)]
mod rewrite_props;

pub mod generators;
