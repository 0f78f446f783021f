use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::{ApplyId, FunctionGraph};
use crate::error::{CycleSnafu, Result};

/// Kahn's algorithm over the member nodes of a graph, yielding ready nodes lowest import
/// sequence first.
///
/// The iterator stops early when the remaining nodes form a cycle; [`Toposort::blocked`]
/// then names one of them.
#[derive(Debug)]
pub struct Toposort {
    ready: BinaryHeap<Reverse<(u64, ApplyId)>>,
    in_degree: HashMap<ApplyId, usize>,
    successors: HashMap<ApplyId, Vec<ApplyId>>,
    seq: HashMap<ApplyId, u64>,
    remaining: usize,
}

impl Toposort {
    pub(crate) fn new(fgraph: &FunctionGraph, orderings: &[(ApplyId, ApplyId)]) -> Self {
        let nodes = fgraph.nodes();
        let seq: HashMap<_, _> = nodes.iter().filter_map(|&n| Some((n, fgraph.import_seq(n)?))).collect();
        let mut in_degree: HashMap<ApplyId, usize> = nodes.iter().map(|&n| (n, 0)).collect();
        let mut successors: HashMap<ApplyId, Vec<ApplyId>> = HashMap::new();

        let mut edge = |from: ApplyId, to: ApplyId| {
            if let Some(degree) = in_degree.get_mut(&to) {
                *degree += 1;
                successors.entry(from).or_default().push(to);
            }
        };
        for &node in &nodes {
            for &input in fgraph.node(node).inputs() {
                if let Some(producer) = fgraph.var(input).owner_node().filter(|p| fgraph.contains_node(*p)) {
                    edge(producer, node);
                }
            }
        }
        for &(before, after) in orderings {
            if before != after && fgraph.contains_node(before) {
                edge(before, after);
            }
        }

        let ready = in_degree.iter().filter(|(_, d)| **d == 0).map(|(&n, _)| Reverse((seq[&n], n))).collect();
        Self { ready, in_degree, successors, seq, remaining: nodes.len() }
    }

    /// Nodes not yet yielded.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// A node that can never become ready, if the iterator is exhausted with nodes left.
    pub fn blocked(&self) -> Option<ApplyId> {
        if !self.ready.is_empty() || self.remaining == 0 {
            return None;
        }
        self.in_degree.iter().filter(|(_, d)| **d > 0).map(|(&n, _)| n).min_by_key(|n| self.seq[n])
    }

    /// Drain into a full order, failing with [`Cycle`](crate::Error::Cycle) when blocked.
    pub fn into_order(mut self) -> Result<Vec<ApplyId>> {
        let order: Vec<_> = self.by_ref().collect();
        match self.blocked() {
            Some(node) => CycleSnafu { node }.fail(),
            None => Ok(order),
        }
    }
}

impl Iterator for Toposort {
    type Item = ApplyId;

    fn next(&mut self) -> Option<ApplyId> {
        let Reverse((_, node)) = self.ready.pop()?;
        self.remaining -= 1;
        for next in self.successors.remove(&node).unwrap_or_default() {
            if let Some(degree) = self.in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    self.ready.push(Reverse((self.seq[&next], next)));
                }
            }
        }
        self.in_degree.remove(&node);
        Some(node)
    }
}
