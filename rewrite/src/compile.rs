//! The compile pipeline: from a user graph to the rewritten graph a backend runs.
//!
//! 1. Wrap the inputs and outputs (plus one extra output per input update) in a
//!    [`FunctionGraph`].
//! 2. Reject or report inputs no output depends on.
//! 3. Attach the [`Supervisor`] (and the [`DestroyHandler`] when in-place input graphs are
//!    accepted), so no rewrite may overwrite storage owned by the caller.
//! 4. Run the passes selected by the configuration.
//! 5. Copy outputs that would otherwise alias an input, a constant or another output.
//! 6. Compute the final order and the no-recycling set.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use graft_ir::alias::{alias_root, infer_reuse_pattern, view_tree};
use graft_ir::ops::{DeepCopy, ViewOp};
use graft_ir::{
    ApplyId, Client, DestroyHandler, FunctionGraph, IntoOpRef, NodeArena, OpRef, Supervisor, TensorData, VarId,
};
use tracing::{debug, warn};

use crate::catalog::OPTDB;
use crate::config::{OnUnusedInput, RewriteConfig};
use crate::db::RewriteDb;
use crate::driver::Driver;
use crate::error::{InplaceNotAcceptedSnafu, Result, UnusedInputSnafu};
use crate::report::RewriteReport;

/// A graph input and what the caller allows the compiled graph to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct In {
    pub variable: VarId,
    /// The graph may overwrite the caller's buffer.
    pub mutable: bool,
    /// Outputs may share storage with the caller's buffer.
    pub borrow: bool,
    /// Value that replaces this input after each call.
    pub update: Option<VarId>,
}

impl In {
    pub fn new(variable: VarId) -> Self {
        Self { variable, mutable: false, borrow: false, update: None }
    }

    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn borrow(mut self, borrow: bool) -> Self {
        self.borrow = borrow;
        self
    }

    pub fn with_update(mut self, update: VarId) -> Self {
        self.update = Some(update);
        self
    }
}

impl From<VarId> for In {
    fn from(variable: VarId) -> Self {
        Self::new(variable)
    }
}

/// A graph output. A borrowed output may share storage with the backend's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Out {
    pub variable: VarId,
    pub borrow: bool,
}

impl Out {
    pub fn new(variable: VarId) -> Self {
        Self { variable, borrow: false }
    }

    pub fn borrow(mut self, borrow: bool) -> Self {
        self.borrow = borrow;
        self
    }
}

impl From<VarId> for Out {
    fn from(variable: VarId) -> Self {
        Self::new(variable)
    }
}

/// What the compile pipeline hands to a backend.
#[derive(Debug)]
pub struct CompiledGraph {
    /// The rewritten graph. Its outputs are the requested outputs followed by the updates.
    pub fgraph: FunctionGraph,
    /// Evaluation order, honoring in-place orderings.
    pub order: Vec<ApplyId>,
    pub report: RewriteReport,
    /// Variables whose storage must not be reused between calls.
    pub no_recycling: BTreeSet<VarId>,
    /// Output index to the index of the input it updates.
    pub update_mapping: BTreeMap<usize, usize>,
    pub rewrite_time: Duration,
}

impl CompiledGraph {
    /// Run the compiled graph with the reference evaluator. Returns every output, updates
    /// included.
    pub fn evaluate(&self, inputs: &[TensorData]) -> Result<Vec<TensorData>> {
        Ok(graft_ir::eval::evaluate(&self.fgraph, inputs)?)
    }
}

/// Compile with the standard database.
pub fn compile(arena: NodeArena, inputs: &[In], outputs: &[Out], config: &RewriteConfig) -> Result<CompiledGraph> {
    compile_with(&OPTDB, arena, inputs, outputs, config)
}

pub fn compile_with(
    db: &RewriteDb,
    arena: NodeArena,
    inputs: &[In],
    outputs: &[Out],
    config: &RewriteConfig,
) -> Result<CompiledGraph> {
    let start = Instant::now();

    let mut outputs = outputs.to_vec();
    let mut update_mapping = BTreeMap::new();
    for (index, input) in inputs.iter().enumerate() {
        if let Some(update) = input.update {
            update_mapping.insert(outputs.len(), index);
            outputs.push(Out::new(update).borrow(true));
        }
    }
    let mut fgraph = FunctionGraph::new(
        arena,
        inputs.iter().map(|input| input.variable).collect(),
        outputs.iter().map(|output| output.variable).collect(),
    )?;

    check_unused_inputs(&fgraph, inputs, config.on_unused_input)?;
    attach_supervisor(&mut fgraph, inputs, config.accept_inplace)?;

    let passes = db.query(&config.query());
    debug!(level = %config.opt_level, passes = passes.len(), nodes = fgraph.num_nodes(), "rewriting graph");
    let rewrite_start = Instant::now();
    let report = Driver::new(config).run(&mut fgraph, &passes)?;
    let rewrite_time = rewrite_start.elapsed();

    insert_deepcopy(&mut fgraph, inputs, &outputs)?;

    let owned: Vec<VarId> =
        fgraph.outputs().iter().zip(&outputs).filter(|(_, output)| !output.borrow).map(|(&var, _)| var).collect();
    let no_recycling = infer_reuse_pattern(&fgraph, &owned);
    let order = fgraph.toposort()?;

    debug!(nodes = order.len(), rewrite_time = ?rewrite_time, elapsed = ?start.elapsed(), "graph compiled");
    Ok(CompiledGraph { fgraph, order, report, no_recycling, update_mapping, rewrite_time })
}

fn check_unused_inputs(fgraph: &FunctionGraph, inputs: &[In], policy: OnUnusedInput) -> Result<()> {
    for (index, input) in inputs.iter().enumerate() {
        let var = input.variable;
        if input.update.is_some() || !fgraph.clients(var).is_empty() {
            continue;
        }
        match policy {
            OnUnusedInput::Raise => return UnusedInputSnafu { index, var }.fail(),
            OnUnusedInput::Warn => warn!(index, %var, "input is not used to compute any output"),
            OnUnusedInput::Ignore => {}
        }
    }
    Ok(())
}

fn destroyed(fgraph: &FunctionGraph, var: VarId) -> bool {
    fgraph.feature::<DestroyHandler>().is_some_and(|handler| handler.destroyer_of(var).is_some())
}

fn attach_supervisor(fgraph: &mut FunctionGraph, inputs: &[In], accept_inplace: bool) -> Result<()> {
    if accept_inplace {
        fgraph.attach_feature(DestroyHandler::new())?;
    } else if let Some(node) = fgraph.nodes().into_iter().find(|&n| !fgraph.node(n).op().destroy_map().is_empty()) {
        return InplaceNotAcceptedSnafu { node }.fail();
    }

    // Inputs the user graph already overwrites are not protected, that is what it asked for.
    let protected: Vec<VarId> = inputs
        .iter()
        .filter(|input| !input.mutable && !destroyed(fgraph, input.variable))
        .map(|input| input.variable)
        .collect();
    fgraph.attach_feature(Supervisor::new(protected))?;
    Ok(())
}

/// The copy output `index` needs, if any.
fn output_copy(fgraph: &FunctionGraph, inputs: &[In], outputs: &[Out], index: usize) -> Option<OpRef> {
    let var = fgraph.outputs()[index];
    let borrow = outputs[index].borrow;
    let tree = view_tree(fgraph, var);

    if let Some(other) = fgraph.outputs()[index + 1..].iter().position(|o| tree.contains(o)) {
        let both_borrowed = borrow && outputs[index + 1 + other].borrow;
        return Some(if both_borrowed { ViewOp.into_op() } else { DeepCopy.into_op() });
    }

    let root = alias_root(fgraph, var);
    if let Some(input) = inputs.iter().find(|input| input.variable == root) {
        if input.update.is_some() || destroyed(fgraph, root) {
            return None;
        }
        return Some(if borrow && input.borrow { ViewOp.into_op() } else { DeepCopy.into_op() });
    }
    if fgraph.var(root).is_constant() {
        return Some(if borrow { ViewOp.into_op() } else { DeepCopy.into_op() });
    }
    None
}

fn insert_deepcopy(fgraph: &mut FunctionGraph, inputs: &[In], outputs: &[Out]) -> Result<()> {
    let mut copied = Vec::new();
    for index in 0..fgraph.outputs().len() {
        let Some(op) = output_copy(fgraph, inputs, outputs, index) else {
            continue;
        };
        let var = fgraph.outputs()[index];
        let copy = fgraph.nodes_mut().apply1(op, &[var])?;
        fgraph.change_node_input(Client::Output { index }, copy, "insert_deepcopy")?;
        copied.push(index);
    }
    if !copied.is_empty() {
        debug!(outputs = ?copied, "copied aliased outputs");
    }
    Ok(())
}
