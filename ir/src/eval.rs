//! Reference evaluator.
//!
//! Interprets a graph node by node in toposort order through each op's `perform` hook. Every
//! intermediate value is kept, so destroy maps have no effect here: an in-place node computes
//! the same values as its out-of-place counterpart.

use std::collections::HashMap;
use std::sync::Arc;

use snafu::{OptionExt, ensure};
use tracing::trace;

use crate::error::{NotEvaluableSnafu, Result, ValueCountSnafu, ValueTypeMismatchSnafu};
use crate::graph::{FunctionGraph, VarId};
use crate::value::TensorData;

pub fn evaluate(fgraph: &FunctionGraph, inputs: &[TensorData]) -> Result<Vec<TensorData>> {
    ensure!(
        inputs.len() == fgraph.inputs().len(),
        ValueCountSnafu { expected: fgraph.inputs().len(), actual: inputs.len() }
    );

    let mut values: HashMap<VarId, Arc<TensorData>> = HashMap::new();
    for (&var, data) in fgraph.inputs().iter().zip(inputs) {
        let expected = fgraph.var(var).ty();
        ensure!(
            expected.accepts(data),
            ValueTypeMismatchSnafu { value_type: Box::new(data.tensor_type()), expected: Box::new(expected.clone()) }
        );
        values.insert(var, Arc::new(data.clone()));
    }

    let lookup = |values: &HashMap<VarId, Arc<TensorData>>, var: VarId| -> Option<Arc<TensorData>> {
        values.get(&var).cloned().or_else(|| fgraph.var(var).constant().cloned())
    };

    for node in fgraph.toposort()? {
        let apply = fgraph.node(node);
        let args = apply
            .inputs()
            .iter()
            .map(|&var| {
                lookup(&values, var).context(NotEvaluableSnafu { op: format!("{} (missing {var})", apply.op()) })
            })
            .collect::<Result<Vec<_>>>()?;
        let arg_refs: Vec<&TensorData> = args.iter().map(Arc::as_ref).collect();
        let outputs = apply.op().perform(&arg_refs).context(NotEvaluableSnafu { op: apply.op().to_string() })??;
        ensure!(
            outputs.len() == apply.outputs().len(),
            ValueCountSnafu { expected: apply.outputs().len(), actual: outputs.len() }
        );
        trace!(%node, op = %apply.op(), "evaluated");
        for (&var, data) in apply.outputs().iter().zip(outputs) {
            values.insert(var, Arc::new(data));
        }
    }

    fgraph
        .outputs()
        .iter()
        .map(|&var| {
            lookup(&values, var)
                .map(|data| data.as_ref().clone())
                .context(NotEvaluableSnafu { op: format!("output {var}") })
        })
        .collect()
}
