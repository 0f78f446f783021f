//! Replacement history of graph variables.
//!
//! Each [`FunctionGraph`](crate::graph::FunctionGraph) keeps a log of events per variable:
//! when it entered the graph and which rewrite replaced it by what. Events are only recorded
//! for committed mutations, so a rolled-back rewrite leaves no trace here.

use std::collections::{BTreeMap, HashMap, HashSet};

use derive_more::Display;

use crate::graph::VarId;

/// Individual provenance event in a variable's history.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ProvenanceEvent {
    /// The variable's producer was imported into the graph.
    #[display("imported by {reason}")]
    Imported { reason: String },

    /// Every client of the variable was moved to `by`.
    #[display("replaced by {by} ({reason})")]
    Replaced { by: VarId, reason: String },
}

pub type ProvenanceChain = Vec<(VarId, ProvenanceEvent)>;

#[derive(Debug, Clone, Default)]
pub struct ProvenanceLog {
    events: HashMap<VarId, Vec<ProvenanceEvent>>,
}

impl ProvenanceLog {
    pub fn record(&mut self, var: VarId, event: ProvenanceEvent) {
        self.events.entry(var).or_default().push(event);
    }

    pub fn events(&self, var: VarId) -> &[ProvenanceEvent] {
        self.events.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The variable that ended up standing in for `var`, following replacements.
    pub fn final_replacement(&self, var: VarId) -> VarId {
        self.chain(var).last().and_then(|(_, event)| replaced_by(event)).unwrap_or(var)
    }

    /// Replacement events starting at `var`, following each `Replaced { by }` link.
    pub fn chain(&self, var: VarId) -> ProvenanceChain {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = var;
        while visited.insert(current) {
            let Some(event) = self.events(current).iter().rev().find(|e| replaced_by(e).is_some()) else {
                break;
            };
            chain.push((current, event.clone()));
            match replaced_by(event) {
                Some(next) => current = next,
                None => break,
            }
        }
        chain
    }

    /// How many replacements each reason performed.
    pub fn reason_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for event in self.events.values().flatten() {
            if let ProvenanceEvent::Replaced { reason, .. } = event {
                *counts.entry(reason.as_str()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn replaced_by(event: &ProvenanceEvent) -> Option<VarId> {
    match event {
        ProvenanceEvent::Replaced { by, .. } => Some(*by),
        ProvenanceEvent::Imported { .. } => None,
    }
}

/// Format a provenance chain for display.
pub fn format_chain(chain: &ProvenanceChain) -> String {
    let mut output = String::new();
    for (i, (var, event)) in chain.iter().enumerate() {
        output.push_str(&format!("\n  [{i}] {var} {event}"));
    }
    output
}
