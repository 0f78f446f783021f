//! Pass execution.
//!
//! Global passes call their rewriter until it stops reporting changes. Equilibrium passes keep
//! a work-list of nodes, seeded in toposort order: each popped node is offered to the local
//! rewrites in order and the first replacement that the graph accepts wins. Whatever the
//! replacement touched (newly imported nodes, producers and consumers of the new variables) is
//! queued again. Once the work-list drains, the group's global members run, and a change there
//! reseeds the work-list.
//!
//! A candidate that fails (type mismatch, aliasing conflict, rolled-back structure error) is
//! recorded as skipped. Only fatal errors abort the run.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use graft_ir::{ApplyId, Change, Feature, FunctionGraph, VarId};
use tracing::{debug, trace, warn};

use crate::catalog::OPTDB;
use crate::config::{DEFAULT_MAX_GLOBAL_ITERATIONS, DEFAULT_MAX_USE_RATIO, RewriteConfig};
use crate::db::{NamedGlobal, NamedLocal, Pass, PassList};
use crate::error::Result;
use crate::report::{PassKind, PassStats, RewriteReport};
use crate::rewriter::{GraphRewriter, NodeRewriter, RewriteContext};

/// Records nodes imported while a pass runs, so the driver can queue them.
#[derive(Debug, Default)]
struct ImportTracker {
    imported: Vec<ApplyId>,
}

impl Feature for ImportTracker {
    fn name(&self) -> &'static str {
        "import_tracker"
    }

    fn after(&mut self, _fgraph: &FunctionGraph, change: &Change, _reason: &str) -> graft_ir::Result<()> {
        match *change {
            Change::Import { node, .. } => self.imported.push(node),
            Change::Prune { node, .. } => self.imported.retain(|n| *n != node),
            _ => {}
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn take_imported(fgraph: &mut FunctionGraph) -> Vec<ApplyId> {
    fgraph.feature_mut::<ImportTracker>().map(|tracker| std::mem::take(&mut tracker.imported)).unwrap_or_default()
}

/// FIFO of member nodes without duplicates.
#[derive(Debug, Default)]
struct WorkList {
    queue: VecDeque<ApplyId>,
    queued: HashSet<ApplyId>,
}

impl WorkList {
    fn push(&mut self, node: ApplyId) {
        if self.queued.insert(node) {
            self.queue.push_back(node);
        }
    }

    fn pop(&mut self) -> Option<ApplyId> {
        let node = self.queue.pop_front()?;
        self.queued.remove(&node);
        Some(node)
    }
}

/// Outcome of offering one node to one local rewrite.
enum Attempt {
    NoMatch,
    Skipped,
    Applied(Vec<VarId>),
}

#[derive(Debug, Clone, Copy)]
pub struct Driver {
    max_use_ratio: f64,
    max_global_iterations: usize,
}

impl Default for Driver {
    fn default() -> Self {
        Self { max_use_ratio: DEFAULT_MAX_USE_RATIO, max_global_iterations: DEFAULT_MAX_GLOBAL_ITERATIONS }
    }
}

impl Driver {
    pub fn new(config: &RewriteConfig) -> Self {
        Self { max_use_ratio: config.max_use_ratio, max_global_iterations: config.max_global_iterations }
    }

    pub fn with_max_use_ratio(mut self, ratio: f64) -> Self {
        self.max_use_ratio = ratio;
        self
    }

    pub fn with_max_global_iterations(mut self, iterations: usize) -> Self {
        self.max_global_iterations = iterations;
        self
    }

    /// Run every pass in order, then audit the result.
    pub fn run(&self, fgraph: &mut FunctionGraph, passes: &PassList) -> Result<RewriteReport> {
        let start = Instant::now();
        let mut report = RewriteReport::default();
        for pass in passes {
            report.passes.push(self.run_pass(fgraph, pass)?);
        }
        fgraph.check_integrity()?;
        fgraph.toposort()?;
        report.elapsed = start.elapsed();
        debug!(passes = passes.len(), elapsed = ?report.elapsed, "rewriting finished");
        Ok(report)
    }

    pub fn run_pass(&self, fgraph: &mut FunctionGraph, pass: &Pass) -> Result<PassStats> {
        let start = Instant::now();
        let mut stats = match pass {
            Pass::Global { name, rewriter } => self.run_global(fgraph, name, rewriter.as_ref())?,
            Pass::Equilibrium { name, locals, globals } => self.run_equilibrium(fgraph, name, locals, globals)?,
        };
        stats.elapsed = start.elapsed();
        debug!(
            pass = %stats.name,
            applied = stats.total_applied(),
            skipped = stats.skipped.len(),
            elapsed = ?stats.elapsed,
            "pass finished"
        );
        Ok(stats)
    }

    fn run_global(&self, fgraph: &mut FunctionGraph, name: &str, rewriter: &dyn GraphRewriter) -> Result<PassStats> {
        let mut stats = PassStats::new(name, PassKind::Global);
        rewriter.add_requirements(fgraph)?;
        loop {
            if stats.iterations == self.max_global_iterations {
                warn!(pass = name, iterations = stats.iterations, "global pass did not reach a fixed point");
                stats.capped = true;
                break;
            }
            stats.iterations += 1;
            if !apply_global(fgraph, name, rewriter, &mut stats)? {
                break;
            }
        }
        Ok(stats)
    }

    fn run_equilibrium(
        &self,
        fgraph: &mut FunctionGraph,
        name: &str,
        locals: &[NamedLocal],
        globals: &[NamedGlobal],
    ) -> Result<PassStats> {
        let mut stats = PassStats::new(name, PassKind::Equilibrium);
        for (_, global) in globals {
            global.add_requirements(fgraph)?;
        }
        let tracking = !fgraph.has_feature::<ImportTracker>();
        if tracking {
            fgraph.attach_feature(ImportTracker::default())?;
        }
        let result = self.equilibrium(fgraph, name, locals, globals, &mut stats);
        if tracking {
            fgraph.detach_feature::<ImportTracker>();
        }
        result.map(|()| stats)
    }

    fn equilibrium(
        &self,
        fgraph: &mut FunctionGraph,
        name: &str,
        locals: &[NamedLocal],
        globals: &[NamedGlobal],
        stats: &mut PassStats,
    ) -> Result<()> {
        let budget = (self.max_use_ratio * fgraph.num_nodes().max(1) as f64).ceil().max(1.0) as usize;
        let mut uses = 0usize;

        loop {
            stats.iterations += 1;
            let mut work = WorkList::default();
            for node in fgraph.toposort()? {
                work.push(node);
            }
            take_imported(fgraph);

            while let Some(node) = work.pop() {
                if !fgraph.contains_node(node) {
                    continue;
                }
                for (rewrite, rewriter) in locals {
                    let family = fgraph.node(node).family();
                    if rewriter.tracks().is_some_and(|families| !families.contains(&family)) {
                        continue;
                    }
                    if uses >= budget {
                        budget_exhausted(name, budget, stats);
                        return Ok(());
                    }
                    let new_vars = match try_local(fgraph, rewrite, rewriter.as_ref(), node, stats)? {
                        Attempt::NoMatch | Attempt::Skipped => continue,
                        Attempt::Applied(new_vars) => new_vars,
                    };

                    uses += 1;
                    for imported in take_imported(fgraph) {
                        work.push(imported);
                    }
                    for var in new_vars {
                        if let Some(owner) = fgraph.var(var).owner_node().filter(|n| fgraph.contains_node(*n)) {
                            work.push(owner);
                        }
                        for consumer in fgraph.consumers(var).collect::<Vec<_>>() {
                            work.push(consumer);
                        }
                    }
                    if fgraph.contains_node(node) {
                        work.push(node);
                    }
                    break;
                }
            }

            let mut changed = false;
            for (rewrite, global) in globals {
                if uses >= budget {
                    budget_exhausted(name, budget, stats);
                    return Ok(());
                }
                if apply_global(fgraph, rewrite, global.as_ref(), stats)? {
                    uses += 1;
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
            trace!(pass = name, "global members changed the graph, reseeding");
        }
    }
}

/// Stop before another candidate would exceed the rewrite budget.
fn budget_exhausted(pass: &str, budget: usize, stats: &mut PassStats) {
    warn!(pass, budget, "equilibrium pass reached its rewrite budget");
    stats.capped = true;
}

fn try_local(
    fgraph: &mut FunctionGraph,
    rewrite: &str,
    rewriter: &dyn NodeRewriter,
    node: ApplyId,
    stats: &mut PassStats,
) -> Result<Attempt> {
    let proposed = rewriter.transform(&mut RewriteContext::new(fgraph), node);
    let new_vars = match proposed {
        Ok(None) => return Ok(Attempt::NoMatch),
        Ok(Some(new_vars)) => new_vars,
        Err(error) if error.is_fatal() => return Err(error.into()),
        Err(error) => {
            trace!(rewrite, %node, %error, "rewrite failed");
            stats.record_skipped(rewrite, Some(node), error);
            return Ok(Attempt::Skipped);
        }
    };

    let old_vars = fgraph.node(node).outputs().to_vec();
    if new_vars.len() != old_vars.len() {
        let reason = format!("returned {} replacements for {} outputs", new_vars.len(), old_vars.len());
        warn!(rewrite, %node, %reason, "malformed rewrite result");
        stats.record_skipped(rewrite, Some(node), reason);
        return Ok(Attempt::Skipped);
    }
    let pairs: Vec<(VarId, VarId)> =
        old_vars.into_iter().zip(new_vars.iter().copied()).filter(|(o, n)| o != n).collect();
    if pairs.is_empty() {
        return Ok(Attempt::NoMatch);
    }

    match fgraph.replace_all(&pairs, rewrite) {
        Ok(()) => {
            debug!(rewrite, %node, "rewrite applied");
            stats.record_applied(rewrite);
            Ok(Attempt::Applied(new_vars))
        }
        Err(error) if error.is_fatal() => Err(error.into()),
        Err(error) => {
            debug!(rewrite, %node, %error, "rewrite rejected by the graph");
            stats.record_skipped(rewrite, Some(node), error);
            Ok(Attempt::Skipped)
        }
    }
}

/// One `apply` call. Returns whether the graph changed.
fn apply_global(
    fgraph: &mut FunctionGraph,
    rewrite: &str,
    rewriter: &dyn GraphRewriter,
    stats: &mut PassStats,
) -> Result<bool> {
    match rewriter.apply(fgraph) {
        Ok(changed) => {
            if changed {
                debug!(rewrite, "global rewrite applied");
                stats.record_applied(rewrite);
            }
            Ok(changed)
        }
        Err(error) if error.is_fatal() => Err(error.into()),
        Err(error) => {
            debug!(rewrite, %error, "global rewrite failed");
            stats.record_skipped(rewrite, None, error);
            Ok(false)
        }
    }
}

/// Rewrite `fgraph` with the standard database at the level and limits of `config`.
pub fn rewrite_graph(fgraph: &mut FunctionGraph, config: &RewriteConfig) -> Result<RewriteReport> {
    Driver::new(config).run(fgraph, &OPTDB.query(&config.query()))
}
