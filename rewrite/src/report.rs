//! Statistics collected while running a pass list.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::time::Duration;

use graft_ir::ApplyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PassKind {
    Global,
    Equilibrium,
}

/// A rewrite that matched but could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRewrite {
    pub rewrite: String,
    /// The matched node, for local rewrites.
    pub node: Option<ApplyId>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassStats {
    pub name: String,
    pub kind: PassKind,
    /// Sweeps for equilibrium passes, `apply` calls for global ones.
    pub iterations: usize,
    /// Successful applications per rewrite name.
    pub applied: BTreeMap<String, usize>,
    pub skipped: Vec<SkippedRewrite>,
    /// Whether the pass stopped at its iteration budget instead of a fixed point.
    pub capped: bool,
    pub elapsed: Duration,
}

impl PassStats {
    pub fn new(name: impl Into<String>, kind: PassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            iterations: 0,
            applied: BTreeMap::new(),
            skipped: Vec::new(),
            capped: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record_applied(&mut self, rewrite: &str) {
        *self.applied.entry(rewrite.to_string()).or_insert(0) += 1;
    }

    pub fn record_skipped(&mut self, rewrite: &str, node: Option<ApplyId>, reason: impl fmt::Display) {
        self.skipped.push(SkippedRewrite { rewrite: rewrite.to_string(), node, reason: reason.to_string() });
    }

    pub fn total_applied(&self) -> usize {
        self.applied.values().sum()
    }

    pub fn changed(&self) -> bool {
        self.total_applied() > 0
    }

    /// Fold the statistics of another run of the same pass into this one.
    pub fn merge(&mut self, other: PassStats) {
        self.iterations += other.iterations;
        for (rewrite, count) in other.applied {
            *self.applied.entry(rewrite).or_insert(0) += count;
        }
        self.skipped.extend(other.skipped);
        self.capped |= other.capped;
        self.elapsed += other.elapsed;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteReport {
    pub passes: Vec<PassStats>,
    pub elapsed: Duration,
}

impl RewriteReport {
    /// Successful applications per rewrite name, over all passes.
    pub fn applied(&self) -> BTreeMap<&str, usize> {
        let mut totals = BTreeMap::new();
        for pass in &self.passes {
            for (rewrite, count) in &pass.applied {
                *totals.entry(rewrite.as_str()).or_insert(0) += count;
            }
        }
        totals
    }

    /// How many times `rewrite` was applied.
    pub fn fired(&self, rewrite: &str) -> usize {
        self.passes.iter().filter_map(|pass| pass.applied.get(rewrite)).sum()
    }

    pub fn changed(&self) -> bool {
        self.passes.iter().any(PassStats::changed)
    }

    pub fn capped(&self) -> bool {
        self.passes.iter().any(|pass| pass.capped)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkippedRewrite> {
        self.passes.iter().flat_map(|pass| &pass.skipped)
    }

    pub fn pass(&self, name: &str) -> Option<&PassStats> {
        self.passes.iter().find(|pass| pass.name == name)
    }

    /// Write the passes that changed the graph and the rewrites that fired in them.
    pub fn print_summary(&self, out: &mut dyn io::Write) -> io::Result<()> {
        write!(out, "{self}")
    }
}

impl fmt::Display for RewriteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total: usize = self.passes.iter().map(PassStats::total_applied).sum();
        writeln!(
            f,
            "{} passes, {total} rewrites applied, {} skipped in {:.3?}",
            self.passes.len(),
            self.skipped().count(),
            self.elapsed
        )?;
        for pass in self.passes.iter().filter(|pass| pass.changed() || pass.capped) {
            let capped = if pass.capped { ", capped" } else { "" };
            writeln!(
                f,
                "  {} ({}, {} iterations{capped}, {:.3?})",
                pass.name, pass.kind, pass.iterations, pass.elapsed
            )?;
            let width = pass.applied.keys().map(String::len).max().unwrap_or(0);
            for (rewrite, count) in &pass.applied {
                writeln!(f, "    {rewrite:<width$}  {count}")?;
            }
        }
        Ok(())
    }
}
