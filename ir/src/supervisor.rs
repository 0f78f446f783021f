use std::any::Any;
use std::collections::BTreeSet;

use crate::destroy::DestroyHandler;
use crate::error::{DestroyedProtectedSnafu, Result};
use crate::graph::{Feature, FunctionGraph, VarId};

/// Guards variables whose storage belongs to the caller.
///
/// Graph outputs are always protected; `protected` typically holds the graph inputs that were
/// not declared mutable. Validation fails when a destroyer overwrites the storage of any of
/// them. Needs a [`DestroyHandler`] attached to see destroyers at all.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    protected: BTreeSet<VarId>,
}

impl Supervisor {
    pub fn new(protected: impl IntoIterator<Item = VarId>) -> Self {
        Self { protected: protected.into_iter().collect() }
    }

    pub fn is_protected(&self, fgraph: &FunctionGraph, var: VarId) -> bool {
        self.protected.contains(&var) || fgraph.is_output(var)
    }

    pub fn protected(&self) -> &BTreeSet<VarId> {
        &self.protected
    }
}

impl Feature for Supervisor {
    fn name(&self) -> &'static str {
        "supervisor"
    }

    fn validate(&self, fgraph: &FunctionGraph) -> Result<()> {
        let Some(handler) = fgraph.feature::<DestroyHandler>() else {
            return Ok(());
        };
        for &var in self.protected.iter().chain(fgraph.outputs()) {
            if let Some(node) = handler.destroyer_of(var) {
                return DestroyedProtectedSnafu { node, var }.fail();
            }
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
