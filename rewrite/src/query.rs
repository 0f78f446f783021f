//! Tag queries over rewrite database entries.
//!
//! A query has three tag sets. An entry matches when it carries at least one `include` tag,
//! every `require` tag and no `exclude` tag. Entry names count as tags, so a query can pick
//! (or drop) a single rewrite by name.
//!
//! Queries parse from tag expressions:
//!
//! ```rust,ignore
//! let query: Query = "fast_run +fusion &stable -inplace".parse()?;
//! ```
//!
//! A bare tag or `+tag` includes, `&tag` requires and `-tag` excludes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use snafu::ensure;

use crate::error::{Error, InvalidTagExpressionSnafu, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    include: BTreeSet<String>,
    require: BTreeSet<String>,
    exclude: BTreeSet<String>,
    position_cutoff: Option<f64>,
    subqueries: BTreeMap<String, Query>,
}

fn tag_set<T: Into<String>>(tags: impl IntoIterator<Item = T>) -> impl Iterator<Item = String> {
    tags.into_iter().map(Into::into)
}

impl Query {
    /// The empty query. It includes nothing, so it matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn including<T: Into<String>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.include.extend(tag_set(tags));
        self
    }

    pub fn requiring<T: Into<String>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.require.extend(tag_set(tags));
        self
    }

    pub fn excluding<T: Into<String>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.exclude.extend(tag_set(tags));
        self
    }

    /// Only keep top-level entries positioned strictly before `cutoff`.
    pub fn with_position_cutoff(mut self, cutoff: f64) -> Self {
        self.position_cutoff = Some(cutoff);
        self
    }

    /// Use `query` instead of this one to select the members of the group named `group`.
    pub fn with_subquery(mut self, group: impl Into<String>, query: Query) -> Self {
        self.subqueries.insert(group.into(), query);
        self
    }

    pub fn include(&self) -> &BTreeSet<String> {
        &self.include
    }

    pub fn require(&self) -> &BTreeSet<String> {
        &self.require
    }

    pub fn exclude(&self) -> &BTreeSet<String> {
        &self.exclude
    }

    pub fn position_cutoff(&self) -> Option<f64> {
        self.position_cutoff
    }

    pub fn subquery(&self, group: &str) -> Option<&Query> {
        self.subqueries.get(group)
    }

    /// Union of both queries' tag sets. `other`'s cutoff and subqueries take precedence.
    pub fn merge(&self, other: &Query) -> Query {
        let mut merged = self.clone();
        merged.include.extend(other.include.iter().cloned());
        merged.require.extend(other.require.iter().cloned());
        merged.exclude.extend(other.exclude.iter().cloned());
        merged.position_cutoff = other.position_cutoff.or(self.position_cutoff);
        merged.subqueries.extend(other.subqueries.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Whether an entry carrying `tags` is selected.
    pub fn matches<'a>(&self, tags: impl IntoIterator<Item = &'a str> + Clone) -> bool {
        let has = |wanted: &str| tags.clone().into_iter().any(|tag| tag == wanted);
        self.include.iter().any(|tag| has(tag))
            && self.require.iter().all(|tag| has(tag))
            && !self.exclude.iter().any(|tag| has(tag))
    }
}

fn valid_tag(tag: &str) -> bool {
    !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
}

impl FromStr for Query {
    type Err = Error;

    fn from_str(expression: &str) -> Result<Self> {
        let mut query = Query::new();
        for token in expression.split_whitespace() {
            let (set, tag) = match token.split_at(token.chars().next().map_or(0, char::len_utf8)) {
                ("+", tag) => (&mut query.include, tag),
                ("&", tag) => (&mut query.require, tag),
                ("-", tag) => (&mut query.exclude, tag),
                _ => (&mut query.include, token),
            };
            ensure!(
                valid_tag(tag),
                InvalidTagExpressionSnafu { expression, reason: format!("malformed tag in {token:?}") }
            );
            set.insert(tag.to_string());
        }
        Ok(query)
    }
}

/// Prints the tag expression. Cutoff and subqueries are not part of it.
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens = self
            .include
            .iter()
            .map(|tag| tag.to_string())
            .chain(self.require.iter().map(|tag| format!("&{tag}")))
            .chain(self.exclude.iter().map(|tag| format!("-{tag}")));
        for (i, token) in tokens.enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&token)?;
        }
        Ok(())
    }
}
