use graft_ir::FunctionGraph;

use crate::db::{Pass, RewriteDb};
use crate::error::Error;
use crate::query::Query;
use crate::rewriter::{GraphRewriter, NodeRewriter, node_rewriter};

struct Noop;

impl GraphRewriter for Noop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn apply(&self, _fgraph: &mut FunctionGraph) -> graft_ir::Result<bool> {
        Ok(false)
    }
}

fn never() -> impl NodeRewriter {
    node_rewriter("never", &[], |_, _| Ok(None))
}

fn query(expression: &str) -> Query {
    expression.parse().unwrap()
}

#[test]
fn test_duplicate_name_rejected() {
    let mut db = RewriteDb::new();
    db.register_global("a", Noop, &["t"], 0.0).unwrap();
    let err = db.register_local("a", never(), &["t"], 1.0).unwrap_err();
    assert_eq!(err, Error::DuplicateRewrite { name: "a".into() });
    assert_eq!(db.len(), 1);
}

#[test]
fn test_unknown_entry() {
    let db = RewriteDb::new();
    assert!(matches!(db.get("missing"), Err(Error::UnknownEntry { .. })));
}

#[test]
fn test_orders_by_position_then_registration() {
    let mut db = RewriteDb::new();
    db.register_global("late", Noop, &["t"], 2.0).unwrap();
    db.register_global("tie_a", Noop, &["t"], 1.5).unwrap();
    db.register_global("early", Noop, &["t"], 1.0).unwrap();
    db.register_global("tie_b", Noop, &["t"], 1.5).unwrap();

    assert_eq!(db.query(&query("t")).names(), ["early", "tie_a", "tie_b", "late"]);
}

#[test]
fn test_name_is_an_implicit_tag() {
    let mut db = RewriteDb::new();
    db.register_global("a", Noop, &["t"], 0.0).unwrap();
    db.register_global("b", Noop, &["t"], 1.0).unwrap();

    assert_eq!(db.query(&query("b")).names(), ["b"]);
    assert_eq!(db.query(&query("t -a")).names(), ["b"]);
}

#[test]
fn test_position_cutoff_is_exclusive() {
    let mut db = RewriteDb::new();
    db.register_global("a", Noop, &["t"], 1.0).unwrap();
    db.register_global("b", Noop, &["t"], 1.5).unwrap();

    let names = db.query(&query("t").with_position_cutoff(1.5)).names().join(",");
    assert_eq!(names, "a");
}

#[test]
fn test_loose_local_becomes_single_equilibrium_pass() {
    let mut db = RewriteDb::new();
    db.register_local("lone", never(), &["t"], 0.0).unwrap();

    let passes = db.query(&query("t"));
    assert_eq!(passes.len(), 1);
    let pass = passes.get("lone").unwrap();
    assert!(matches!(pass, Pass::Equilibrium { locals, globals, .. } if locals.len() == 1 && globals.is_empty()));
    assert_eq!(pass.to_string(), "lone [equilibrium: lone]");
}

fn grouped_db() -> RewriteDb {
    let mut group = RewriteDb::new();
    group.register_global("g", Noop, &["t"], 0.0).unwrap();
    group.register_local("l2", never(), &["t", "extra"], 2.0).unwrap();
    group.register_local("l1", never(), &["t"], 1.0).unwrap();

    let mut db = RewriteDb::new();
    db.register_group("grp", group, &["t"], 5.0).unwrap();
    db.register_global("first", Noop, &["t"], 0.0).unwrap();
    db
}

#[test]
fn test_group_members_follow_the_query() {
    let db = grouped_db();

    let passes = db.query(&query("t"));
    assert_eq!(passes.names(), ["first", "grp"]);
    assert_eq!(passes.get("grp").unwrap().members(), ["l1", "l2", "g"]);

    let passes = db.query(&query("t -extra"));
    assert_eq!(passes.get("grp").unwrap().members(), ["l1", "g"]);
}

#[test]
fn test_group_subquery() {
    let db = grouped_db();
    let passes = db.query(&query("t").with_subquery("grp", query("extra")));
    assert_eq!(passes.get("grp").unwrap().members(), ["l2"]);
}

#[test]
fn test_empty_group_is_dropped() {
    let db = grouped_db();
    let passes = db.query(&query("t").with_subquery("grp", query("nothing")));
    assert_eq!(passes.names(), ["first"]);
}

#[test]
fn test_nested_groups_are_flattened() {
    let mut inner = RewriteDb::new();
    inner.register_local("inner_local", never(), &["t"], 0.0).unwrap();
    let mut outer = RewriteDb::new();
    outer.register_local("outer_local", never(), &["t"], 1.0).unwrap();
    outer.register_group("inner", inner, &["t"], 0.0).unwrap();
    let mut db = RewriteDb::new();
    db.register_group("outer", outer, &["t"], 0.0).unwrap();

    let passes = db.query(&query("t"));
    assert_eq!(passes.get("outer").unwrap().members(), ["inner_local", "outer_local"]);
}

#[test]
fn test_query_does_not_change_the_database() {
    let db = grouped_db();
    let before = format!("{:?}", db.entries().map(|e| e.name()).collect::<Vec<_>>());
    let first = db.query(&query("t")).to_string();
    let second = db.query(&query("t")).to_string();
    assert_eq!(first, second);
    assert_eq!(format!("{:?}", db.entries().map(|e| e.name()).collect::<Vec<_>>()), before);
}

#[test]
fn test_debug_names_rewriters() {
    let mut group = RewriteDb::new();
    group.register_local("never", never(), &["t"], 0.0).unwrap();
    let mut db = RewriteDb::new();
    db.register_global("a", Noop, &["t"], 0.0).unwrap();
    db.register_group("g", group, &["t"], 1.0).unwrap();

    assert_eq!(format!("{:?}", db.get("a").unwrap().rewrite()), "Global(noop)");
    let passes = db.query(&query("t"));
    assert_eq!(format!("{:?}", passes.get("g").unwrap()), "Equilibrium(g, 1 locals, 0 globals)");
}
