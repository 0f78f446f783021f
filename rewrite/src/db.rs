//! The rewrite database.
//!
//! Entries are registered once and never change afterwards. Querying the database produces a
//! [`PassList`]: the matching entries ordered by position, ties broken by registration order.

use std::collections::BTreeSet;
use std::fmt;
use std::iter;
use std::sync::Arc;

use itertools::Itertools;
use snafu::{OptionExt, ensure};
use tracing::{debug, trace};

use crate::error::{DuplicateRewriteSnafu, Result, UnknownEntrySnafu};
use crate::query::Query;
use crate::rewriter::{GraphRewriter, NodeRewriter};

/// What a database entry holds.
#[derive(Clone, derive_more::Debug)]
pub enum Rewrite {
    #[debug("Local({})", _0.name())]
    Local(Arc<dyn NodeRewriter>),
    #[debug("Global({})", _0.name())]
    Global(Arc<dyn GraphRewriter>),
    /// Members run together until none of them changes the graph.
    Group(RewriteDb),
}

impl Rewrite {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Global(_) => "global",
            Self::Group(_) => "equilibrium",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    rewrite: Rewrite,
    tags: BTreeSet<String>,
    position: f64,
    seq: usize,
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rewrite(&self) -> &Rewrite {
        &self.rewrite
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    fn matches(&self, query: &Query) -> bool {
        query.matches(self.tags.iter().map(String::as_str).chain(iter::once(self.name.as_str())))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewriteDb {
    entries: Vec<Entry>,
}

impl RewriteDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_local(
        &mut self,
        name: &str,
        rewriter: impl NodeRewriter,
        tags: &[&str],
        position: f64,
    ) -> Result<()> {
        self.register(name, Rewrite::Local(Arc::new(rewriter)), tags, position)
    }

    pub fn register_global(
        &mut self,
        name: &str,
        rewriter: impl GraphRewriter,
        tags: &[&str],
        position: f64,
    ) -> Result<()> {
        self.register(name, Rewrite::Global(Arc::new(rewriter)), tags, position)
    }

    /// Register an equilibrium group. Its members are selected by the same query as the
    /// group itself, unless the query carries a subquery for `name`.
    pub fn register_group(&mut self, name: &str, group: RewriteDb, tags: &[&str], position: f64) -> Result<()> {
        self.register(name, Rewrite::Group(group), tags, position)
    }

    pub fn register(&mut self, name: &str, rewrite: Rewrite, tags: &[&str], position: f64) -> Result<()> {
        ensure!(!self.contains(name), DuplicateRewriteSnafu { name });
        debug!(name, kind = rewrite.kind(), position, ?tags, "rewrite registered");
        let seq = self.entries.len();
        let tags = tags.iter().map(|tag| tag.to_string()).collect();
        self.entries.push(Entry { name: name.to_string(), rewrite, tags, position, seq });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn get(&self, name: &str) -> Result<&Entry> {
        self.entries.iter().find(|entry| entry.name == name).context(UnknownEntrySnafu { name })
    }

    /// Entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Matching entries by (position, registration order).
    fn selected<'a>(&'a self, query: &Query, cutoff: Option<f64>) -> Vec<&'a Entry> {
        self.entries
            .iter()
            .filter(|entry| cutoff.is_none_or(|cutoff| entry.position < cutoff))
            .filter(|entry| entry.matches(query))
            .sorted_by(|a, b| a.position.total_cmp(&b.position).then(a.seq.cmp(&b.seq)))
            .collect()
    }

    pub fn query(&self, query: &Query) -> PassList {
        let mut passes = Vec::new();
        for entry in self.selected(query, query.position_cutoff()) {
            let name = entry.name.clone();
            match &entry.rewrite {
                Rewrite::Global(rewriter) => passes.push(Pass::Global { name, rewriter: Arc::clone(rewriter) }),
                Rewrite::Local(rewriter) => passes.push(Pass::Equilibrium {
                    name: name.clone(),
                    locals: vec![(name, Arc::clone(rewriter))],
                    globals: Vec::new(),
                }),
                Rewrite::Group(group) => {
                    let member_query = query.subquery(&entry.name).unwrap_or(query);
                    let (locals, globals) = group.members(member_query);
                    if locals.is_empty() && globals.is_empty() {
                        trace!(group = %entry.name, "no group member selected");
                        continue;
                    }
                    passes.push(Pass::Equilibrium { name, locals, globals });
                }
            }
        }
        PassList { passes }
    }

    /// Matching members of a group, nested groups flattened in place.
    fn members(&self, query: &Query) -> (Vec<NamedLocal>, Vec<NamedGlobal>) {
        let mut locals = Vec::new();
        let mut globals = Vec::new();
        for entry in self.selected(query, None) {
            match &entry.rewrite {
                Rewrite::Local(rewriter) => locals.push((entry.name.clone(), Arc::clone(rewriter))),
                Rewrite::Global(rewriter) => globals.push((entry.name.clone(), Arc::clone(rewriter))),
                Rewrite::Group(group) => {
                    let (nested_locals, nested_globals) = group.members(query.subquery(&entry.name).unwrap_or(query));
                    locals.extend(nested_locals);
                    globals.extend(nested_globals);
                }
            }
        }
        (locals, globals)
    }
}

pub type NamedLocal = (String, Arc<dyn NodeRewriter>);
pub type NamedGlobal = (String, Arc<dyn GraphRewriter>);

/// One step of a rewrite schedule.
#[derive(Clone, derive_more::Debug)]
pub enum Pass {
    /// A global rewrite, repeated while it reports changes.
    Global {
        name: String,
        #[debug(skip)]
        rewriter: Arc<dyn GraphRewriter>,
    },
    /// Local rewrites applied to a fixed point, with global members run after each sweep.
    #[debug("Equilibrium({name}, {} locals, {} globals)", locals.len(), globals.len())]
    Equilibrium { name: String, locals: Vec<NamedLocal>, globals: Vec<NamedGlobal> },
}

impl Pass {
    pub fn name(&self) -> &str {
        match self {
            Self::Global { name, .. } | Self::Equilibrium { name, .. } => name,
        }
    }

    /// Names of the rewrites this pass runs.
    pub fn members(&self) -> Vec<&str> {
        match self {
            Self::Global { name, .. } => vec![name.as_str()],
            Self::Equilibrium { locals, globals, .. } => {
                let globals = globals.iter().map(|(name, _)| name.as_str());
                locals.iter().map(|(name, _)| name.as_str()).chain(globals).collect()
            }
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global { name, .. } => write!(f, "{name} [global]"),
            Self::Equilibrium { name, .. } => write!(f, "{name} [equilibrium: {}]", self.members().join(", ")),
        }
    }
}

/// Ordered passes selected by a query.
#[derive(Debug, Clone, Default)]
pub struct PassList {
    passes: Vec<Pass>,
}

impl PassList {
    pub fn iter(&self) -> impl Iterator<Item = &Pass> {
        self.passes.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.passes.iter().map(Pass::name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Pass> {
        self.passes.iter().find(|pass| pass.name() == name)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl<'a> IntoIterator for &'a PassList {
    type Item = &'a Pass;
    type IntoIter = std::slice::Iter<'a, Pass>;

    fn into_iter(self) -> Self::IntoIter {
        self.passes.iter()
    }
}

impl fmt::Display for PassList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pass in &self.passes {
            writeln!(f, "{pass}")?;
        }
        Ok(())
    }
}
