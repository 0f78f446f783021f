use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;

use super::{FunctionGraph, VarId};

impl FunctionGraph {
    /// Position-based name of a member variable, independent of arena ids.
    fn local_names(&self) -> HashMap<VarId, String> {
        let mut names = HashMap::new();
        for (i, &input) in self.inputs().iter().enumerate() {
            let name = self.var(input).name().map_or_else(|| format!("in{i}"), str::to_string);
            names.insert(input, name);
        }
        for (k, node) in self.toposort_iter_with(&[]).enumerate() {
            let outputs = self.node(node).outputs();
            for (j, &output) in outputs.iter().enumerate() {
                let name = if outputs.len() == 1 { format!("%{k}") } else { format!("%{k}.{j}") };
                names.insert(output, name);
            }
        }
        names
    }
}

impl fmt::Display for FunctionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.local_names();
        let name = |var: &VarId| match (names.get(var), self.var(*var).constant()) {
            (Some(name), _) => name.clone(),
            (None, Some(data)) => data.to_string(),
            (None, None) => format!("<{var}>"),
        };

        writeln!(
            f,
            "FunctionGraph({}) {{",
            self.inputs().iter().map(|v| format!("{}: {}", name(v), self.var(*v).ty())).join(", ")
        )?;
        let mut order = self.toposort_iter_with(&[]);
        for node in order.by_ref() {
            let apply = self.node(node);
            writeln!(
                f,
                "  {} = {}({}) :: {}",
                apply.outputs().iter().map(name).join(", "),
                apply.op(),
                apply.inputs().iter().map(name).join(", "),
                apply.outputs().iter().map(|v| self.var(*v).ty().to_string()).join(", "),
            )?;
        }
        if order.remaining() > 0 {
            writeln!(f, "  <{} nodes in a cycle>", order.remaining())?;
        }
        writeln!(f, "  return {}", self.outputs().iter().map(name).join(", "))?;
        write!(f, "}}")
    }
}
