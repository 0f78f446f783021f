use std::collections::{HashMap, HashSet};

use snafu::{OptionExt, ensure};
use tracing::{debug, trace, warn};

use super::{Apply, ApplyId, Change, Client, Feature, NodeArena, Toposort, VarId, Variable};
use crate::error::{
    CorruptedSnafu, CycleSnafu, DuplicateInputSnafu, FeatureAlreadyAttachedSnafu, InputHasOwnerSnafu,
    InvalidClientSnafu, MissingInputSnafu, NotInGraphSnafu, Result, TypeMismatchSnafu,
};
use crate::provenance::{ProvenanceEvent, ProvenanceLog};

/// A mutable, observable computation graph.
///
/// The graph owns a [`NodeArena`] and tracks which of its nodes are *members*: everything
/// reachable from the declared outputs back to the declared inputs and constants. Every
/// mutation (import, replace, input change) is transactional: features are notified of each
/// primitive [`Change`], then asked to validate the result, and any error rolls the graph and
/// the features back to their state before the call.
#[derive(derive_more::Debug)]
pub struct FunctionGraph {
    arena: NodeArena,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    /// Member nodes and their import sequence numbers.
    nodes: HashMap<ApplyId, u64>,
    variables: HashSet<VarId>,
    clients: HashMap<VarId, Vec<Client>>,
    next_seq: u64,
    #[debug(skip)]
    features: Vec<Box<dyn Feature>>,
    journal: Option<Vec<Change>>,
    /// Client lists as they were before the open transaction first touched them.
    saved_clients: HashMap<VarId, Option<Vec<Client>>>,
    pending: Vec<(VarId, ProvenanceEvent)>,
    provenance: ProvenanceLog,
}

impl FunctionGraph {
    /// Build a graph computing `outputs` from `inputs`, importing every node in between.
    pub fn new(arena: NodeArena, inputs: Vec<VarId>, outputs: Vec<VarId>) -> Result<Self> {
        let mut seen = HashSet::new();
        for &var in &inputs {
            ensure!(arena.var_checked(var)?.owner.is_none(), InputHasOwnerSnafu { var });
            ensure!(seen.insert(var), DuplicateInputSnafu { var });
        }

        let mut fgraph = Self {
            arena,
            variables: inputs.iter().copied().collect(),
            clients: inputs.iter().map(|&var| (var, Vec::new())).collect(),
            inputs,
            outputs: Vec::new(),
            nodes: HashMap::new(),
            next_seq: 0,
            features: Vec::new(),
            journal: None,
            saved_clients: HashMap::new(),
            pending: Vec::new(),
            provenance: ProvenanceLog::default(),
        };
        for var in outputs {
            fgraph.add_output(var, "init")?;
        }
        Ok(fgraph)
    }

    // ===== Accessors =====

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Mutable access to the arena for allocating detached nodes. The arena is append-only,
    /// so nothing done through it changes the graph until an import or replacement.
    pub fn nodes_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.arena[id]
    }

    pub fn node(&self, id: ApplyId) -> &Apply {
        &self.arena[id]
    }

    pub fn contains_node(&self, node: ApplyId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn contains_var(&self, var: VarId) -> bool {
        self.variables.contains(&var)
    }

    pub fn is_input(&self, var: VarId) -> bool {
        self.inputs.contains(&var)
    }

    pub fn is_output(&self, var: VarId) -> bool {
        self.outputs.contains(&var)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn import_seq(&self, node: ApplyId) -> Option<u64> {
        self.nodes.get(&node).copied()
    }

    /// Member nodes in import order.
    pub fn nodes(&self) -> Vec<ApplyId> {
        let mut nodes: Vec<_> = self.nodes.iter().map(|(&node, &seq)| (seq, node)).collect();
        nodes.sort_unstable();
        nodes.into_iter().map(|(_, node)| node).collect()
    }

    /// Member variables, sorted by id.
    pub fn variables(&self) -> Vec<VarId> {
        let mut vars: Vec<_> = self.variables.iter().copied().collect();
        vars.sort_unstable();
        vars
    }

    pub fn clients(&self, var: VarId) -> &[Client] {
        self.clients.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Member nodes reading `var`, in client order (a node reading it twice appears twice).
    pub fn consumers(&self, var: VarId) -> impl Iterator<Item = ApplyId> + '_ {
        self.clients(var).iter().filter_map(Client::node)
    }

    pub fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    /// Variable currently stored in a client slot.
    pub fn slot(&self, client: Client) -> Option<VarId> {
        match client {
            Client::Node { node, index } if self.contains_node(node) => self.arena[node].inputs.get(index).copied(),
            Client::Node { .. } => None,
            Client::Output { index } => self.outputs.get(index).copied(),
        }
    }

    /// Whether `node` transitively consumes an output of `ancestor`.
    pub fn is_ancestor(&self, ancestor: ApplyId, node: ApplyId) -> bool {
        let mut stack = vec![node];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            for &input in &self.arena[current].inputs {
                if let Some((producer, _)) = self.arena[input].owner {
                    if producer == ancestor {
                        return true;
                    }
                    if self.nodes.contains_key(&producer) && seen.insert(producer) {
                        stack.push(producer);
                    }
                }
            }
        }
        false
    }

    /// Whether `var` is computed from an output of `node`.
    pub fn depends_on(&self, var: VarId, node: ApplyId) -> bool {
        match self.arena[var].owner {
            Some((producer, _)) => producer == node || self.is_ancestor(node, producer),
            None => false,
        }
    }

    // ===== Features =====

    pub fn attach_feature<F: Feature>(&mut self, mut feature: F) -> Result<()> {
        let name = feature.name();
        ensure!(!self.features.iter().any(|f| f.name() == name), FeatureAlreadyAttachedSnafu { name });
        feature.on_attach(self)?;
        debug!(feature = name, "feature attached");
        self.features.push(Box::new(feature));
        Ok(())
    }

    /// Detach the feature of type `F`. Returns whether one was attached.
    pub fn detach_feature<F: Feature>(&mut self) -> bool {
        let Some(position) = self.features.iter().position(|f| f.as_any().is::<F>()) else {
            return false;
        };
        let mut feature = self.features.remove(position);
        feature.on_detach(self);
        debug!(feature = feature.name(), "feature detached");
        true
    }

    pub fn feature<F: Feature>(&self) -> Option<&F> {
        self.features.iter().find_map(|f| f.as_any().downcast_ref::<F>())
    }

    pub fn feature_mut<F: Feature>(&mut self) -> Option<&mut F> {
        self.features.iter_mut().find_map(|f| f.as_any_mut().downcast_mut::<F>())
    }

    pub fn has_feature<F: Feature>(&self) -> bool {
        self.feature::<F>().is_some()
    }

    /// Scheduling constraints contributed by all features.
    pub fn feature_orderings(&self) -> Vec<(ApplyId, ApplyId)> {
        self.features.iter().flat_map(|f| f.orderings(self)).collect()
    }

    /// Run every feature's `validate`.
    pub fn validate(&self) -> Result<()> {
        for feature in &self.features {
            feature.validate(self)?;
        }
        Ok(())
    }

    // ===== Mutations =====

    /// Make a detached node (and its detached producers) members of the graph.
    pub fn import_node(&mut self, node: ApplyId, reason: &str) -> Result<()> {
        self.transact(reason, |g| g.import_closure(node, reason))
    }

    /// Append `var` to the outputs, importing its producers.
    pub fn add_output(&mut self, var: VarId, reason: &str) -> Result<()> {
        self.transact(reason, |g| {
            g.import_var(var, reason)?;
            let index = g.outputs.len();
            g.execute(Change::AddOutput { var, index }, reason)
        })
    }

    pub fn replace(&mut self, old: VarId, new: VarId, reason: &str) -> Result<()> {
        self.replace_all(&[(old, new)], reason)
    }

    /// Rewire every client of each `old` to its `new`, atomically.
    ///
    /// Pairs whose `old` is no longer a member (pruned by an earlier pair) are skipped.
    pub fn replace_all(&mut self, pairs: &[(VarId, VarId)], reason: &str) -> Result<()> {
        self.transact(reason, |g| g.replace_pairs(pairs, reason, true))
    }

    /// [`Self::replace_all`] without the type compatibility check.
    pub fn replace_all_unchecked(&mut self, pairs: &[(VarId, VarId)], reason: &str) -> Result<()> {
        self.transact(reason, |g| g.replace_pairs(pairs, reason, false))
    }

    /// Point a single client slot at `new`.
    pub fn change_node_input(&mut self, client: Client, new: VarId, reason: &str) -> Result<()> {
        self.transact(reason, |g| {
            let old = g.slot(client).context(InvalidClientSnafu { client })?;
            g.check_replacement(old, new)?;
            g.import_var(new, reason)?;
            g.rewire(client, new, reason)
        })
    }

    fn replace_pairs(&mut self, pairs: &[(VarId, VarId)], reason: &str, check_types: bool) -> Result<()> {
        for &(old, new) in pairs {
            if old == new {
                continue;
            }
            if !self.variables.contains(&old) {
                trace!(%old, reason, "replacement target already left the graph");
                continue;
            }
            if check_types {
                self.check_replacement(old, new)?;
            }
            let clients = self.clients(old).to_vec();
            self.import_var(new, reason)?;
            for client in clients {
                if self.slot(client) == Some(old) {
                    self.rewire(client, new, reason)?;
                }
            }
            self.pending.push((old, ProvenanceEvent::Replaced { by: new, reason: reason.to_string() }));
        }
        Ok(())
    }

    fn check_replacement(&self, old: VarId, new: VarId) -> Result<()> {
        let old_type = &self.arena.var_checked(old)?.ty;
        let new_type = &self.arena.var_checked(new)?.ty;
        ensure!(
            old_type.is_super(new_type),
            TypeMismatchSnafu {
                old,
                new,
                old_type: Box::new(old_type.clone()),
                new_type: Box::new(new_type.clone())
            }
        );
        Ok(())
    }

    fn import_var(&mut self, var: VarId, reason: &str) -> Result<()> {
        let variable = self.arena.var_checked(var)?;
        match variable.owner {
            Some((node, _)) => self.import_closure(node, reason),
            None => {
                ensure!(variable.constant.is_some() || self.is_input(var), MissingInputSnafu { var });
                Ok(())
            }
        }
    }

    /// Import `root` after all of its detached producers.
    fn import_closure(&mut self, root: ApplyId, reason: &str) -> Result<()> {
        if self.nodes.contains_key(&root) {
            return Ok(());
        }
        self.arena.node_checked(root)?;

        // `false` while on the DFS stack, `true` once finished.
        let mut marks = HashMap::from([(root, false)]);
        let mut stack = vec![(root, 0usize)];
        let mut order = Vec::new();
        while let Some(&(node, next)) = stack.last() {
            let Some(input) = self.arena.node_checked(node)?.inputs.get(next).copied() else {
                stack.pop();
                marks.insert(node, true);
                order.push(node);
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let variable = self.arena.var_checked(input)?;
            match variable.owner {
                Some((producer, _)) if !self.nodes.contains_key(&producer) => match marks.get(&producer) {
                    Some(false) => return CycleSnafu { node: producer }.fail(),
                    Some(true) => {}
                    None => {
                        marks.insert(producer, false);
                        stack.push((producer, 0));
                    }
                },
                Some(_) => {}
                None => ensure!(variable.constant.is_some() || self.is_input(input), MissingInputSnafu { var: input }),
            }
        }

        for node in order {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.execute(Change::Import { node, seq }, reason)?;
            for &output in &self.arena[node].outputs {
                self.pending.push((output, ProvenanceEvent::Imported { reason: reason.to_string() }));
            }
        }
        Ok(())
    }

    fn rewire(&mut self, client: Client, new: VarId, reason: &str) -> Result<()> {
        let old = match client {
            Client::Node { node, .. } => {
                ensure!(self.contains_node(node), NotInGraphSnafu { node });
                self.slot(client).context(InvalidClientSnafu { client })?
            }
            Client::Output { .. } => self.slot(client).context(InvalidClientSnafu { client })?,
        };
        if old == new {
            return Ok(());
        }
        if let Client::Node { node, .. } = client {
            ensure!(!self.depends_on(new, node), CycleSnafu { node });
        }
        self.execute(Change::ChangeInput { client, old, new }, reason)?;
        self.prune_unused(old, reason)
    }

    /// Prune the producer of `var` if none of its outputs is used anymore, recursively.
    fn prune_unused(&mut self, var: VarId, reason: &str) -> Result<()> {
        let mut work = vec![var];
        while let Some(var) = work.pop() {
            let Some((node, _)) = self.arena[var].owner else {
                continue;
            };
            let Some(&seq) = self.nodes.get(&node) else {
                continue;
            };
            let apply = &self.arena[node];
            if apply.outputs.iter().any(|out| !self.clients(*out).is_empty()) {
                continue;
            }
            let inputs = apply.inputs.clone();
            self.execute(Change::Prune { node, seq }, reason)?;
            work.extend(inputs);
        }
        Ok(())
    }

    // ===== Transactions =====

    /// Run `f` as one atomic mutation. Nested calls join the outermost transaction.
    fn transact<T>(&mut self, reason: &str, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.journal.is_some() {
            return f(self);
        }

        self.journal = Some(Vec::new());
        let result = f(self).and_then(|value| self.validate().map(|()| value));
        let journal = self.journal.take().unwrap_or_default();
        let saved_clients = std::mem::take(&mut self.saved_clients);
        match result {
            Ok(value) => {
                for (var, event) in self.pending.drain(..) {
                    self.provenance.record(var, event);
                }
                Ok(value)
            }
            Err(error) => {
                debug!(reason, %error, changes = journal.len(), "rolling back graph mutation");
                self.pending.clear();
                self.rollback(journal);
                for (var, list) in saved_clients {
                    match list {
                        Some(list) => self.clients.insert(var, list),
                        None => self.clients.remove(&var),
                    };
                }
                Err(error)
            }
        }
    }

    fn execute(&mut self, change: Change, reason: &str) -> Result<()> {
        for feature in &self.features {
            feature.before(self, &change, reason)?;
        }
        self.apply_change(&change);
        if let Some(journal) = self.journal.as_mut() {
            journal.push(change);
        }
        self.notify_after(&change, reason)
    }

    /// Deliver `change` to every feature, even after one of them failed, so that all
    /// features observe the same sequence of changes.
    fn notify_after(&mut self, change: &Change, reason: &str) -> Result<()> {
        let mut features = std::mem::take(&mut self.features);
        let mut result = Ok(());
        for feature in &mut features {
            if let Err(error) = feature.after(self, change, reason) {
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        self.features = features;
        result
    }

    fn rollback(&mut self, journal: Vec<Change>) {
        for change in journal.iter().rev() {
            let inverse = change.inverse();
            self.apply_change(&inverse);
            if let Err(error) = self.notify_after(&inverse, "rollback") {
                warn!(%error, ?inverse, "feature rejected a rollback notification");
            }
        }
    }

    /// Remember the client list of `var` before the open transaction changes it, so a
    /// rollback restores its order and not just its contents.
    fn save_clients(&mut self, var: VarId) {
        if self.journal.is_some() && !self.saved_clients.contains_key(&var) {
            self.saved_clients.insert(var, self.clients.get(&var).cloned());
        }
    }

    fn apply_change(&mut self, change: &Change) {
        match *change {
            Change::Import { node, seq } => {
                self.nodes.insert(node, seq);
                let (inputs, outputs) = {
                    let apply = &self.arena[node];
                    (apply.inputs.clone(), apply.outputs.clone())
                };
                for (index, input) in inputs.into_iter().enumerate() {
                    self.save_clients(input);
                    self.variables.insert(input);
                    self.clients.entry(input).or_default().push(Client::Node { node, index });
                }
                for output in outputs {
                    self.save_clients(output);
                    self.variables.insert(output);
                    self.clients.entry(output).or_default();
                }
            }
            Change::Prune { node, .. } => {
                self.nodes.remove(&node);
                let (inputs, outputs) = {
                    let apply = &self.arena[node];
                    (apply.inputs.clone(), apply.outputs.clone())
                };
                for (index, input) in inputs.into_iter().enumerate() {
                    self.remove_client(input, Client::Node { node, index });
                }
                for output in outputs {
                    self.save_clients(output);
                    self.variables.remove(&output);
                    self.clients.remove(&output);
                }
            }
            Change::ChangeInput { client, old, new } => {
                match client {
                    Client::Node { node, index } => self.arena.set_input(node, index, new),
                    Client::Output { index } => self.outputs[index] = new,
                }
                self.remove_client(old, client);
                self.save_clients(new);
                self.variables.insert(new);
                self.clients.entry(new).or_default().push(client);
            }
            Change::AddOutput { var, index } => {
                self.save_clients(var);
                self.outputs.push(var);
                self.variables.insert(var);
                self.clients.entry(var).or_default().push(Client::Output { index });
            }
            Change::RemoveOutput { var, index } => {
                self.outputs.pop();
                self.remove_client(var, Client::Output { index });
            }
        }
    }

    /// Drop one client entry; ownerless non-input variables leave the graph with their last client.
    fn remove_client(&mut self, var: VarId, client: Client) {
        self.save_clients(var);
        let Some(list) = self.clients.get_mut(&var) else {
            return;
        };
        if let Some(position) = list.iter().position(|c| *c == client) {
            list.remove(position);
        }
        if list.is_empty() && self.arena[var].owner.is_none() && !self.inputs.contains(&var) {
            self.clients.remove(&var);
            self.variables.remove(&var);
        }
    }

    // ===== Ordering and audit =====

    /// Deterministic evaluation order honoring data edges and feature orderings.
    pub fn toposort(&self) -> Result<Vec<ApplyId>> {
        self.toposort_iter().into_order()
    }

    pub fn toposort_iter(&self) -> Toposort {
        Toposort::new(self, &self.feature_orderings())
    }

    /// Toposort over data edges plus `extra` orderings only.
    pub fn toposort_iter_with(&self, extra: &[(ApplyId, ApplyId)]) -> Toposort {
        Toposort::new(self, extra)
    }

    /// Audit every structural invariant. Violations are fatal [`Corrupted`](crate::Error::Corrupted) errors.
    pub fn check_integrity(&self) -> Result<()> {
        fn corrupted(detail: String) -> Result<()> {
            CorruptedSnafu { detail }.fail()
        }

        let mut expected: HashMap<VarId, Vec<Client>> = HashMap::new();
        for node in self.nodes() {
            let Some(apply) = self.arena.get_node(node) else {
                return corrupted(format!("member {node} is not in the arena"));
            };
            for (index, &output) in apply.outputs.iter().enumerate() {
                if self.arena[output].owner != Some((node, index)) {
                    return corrupted(format!("output {output} of {node} has a different owner"));
                }
                if !self.variables.contains(&output) {
                    return corrupted(format!("output {output} of member {node} is not a member"));
                }
            }
            for (index, &input) in apply.inputs.iter().enumerate() {
                if !self.variables.contains(&input) {
                    return corrupted(format!("input {input} of {node} is not a member"));
                }
                match self.arena[input].owner {
                    Some((producer, _)) if !self.nodes.contains_key(&producer) => {
                        return corrupted(format!("{node} reads {input} produced by non-member {producer}"));
                    }
                    None if self.arena[input].constant.is_none() && !self.is_input(input) => {
                        return corrupted(format!("{node} reads free variable {input}"));
                    }
                    _ => {}
                }
                expected.entry(input).or_default().push(Client::Node { node, index });
            }
        }
        for (index, &output) in self.outputs.iter().enumerate() {
            if !self.variables.contains(&output) {
                return corrupted(format!("graph output {output} is not a member"));
            }
            expected.entry(output).or_default().push(Client::Output { index });
        }

        for var in self.variables() {
            let mut actual = self.clients(var).to_vec();
            let mut wanted = expected.remove(&var).unwrap_or_default();
            actual.sort_unstable();
            wanted.sort_unstable();
            if actual != wanted {
                return corrupted(format!("clients of {var} are {actual:?}, expected {wanted:?}"));
            }
        }
        if let Some(var) = expected.keys().min() {
            return corrupted(format!("{var} has clients but is not a member"));
        }

        let mut order = self.toposort_iter_with(&[]);
        order.by_ref().for_each(drop);
        if let Some(node) = order.blocked() {
            return corrupted(format!("data edges form a cycle through {node}"));
        }
        Ok(())
    }
}
