use std::collections::BTreeSet;

use crate::alias::{alias_root, infer_reuse_pattern, view_tree};
use crate::graph::{FunctionGraph, NodeArena};
use crate::op::IntoOpRef;
use crate::ops::{Elementwise, Elemwise, Reshape, ScalarOp, Slice, Subtensor, ViewOp};
use crate::test::{binary, fvec};

#[test]
fn test_alias_root_follows_views() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(6));
    let reshaped = arena.apply1(Reshape::new(&[2, 3]).into_op(), &[x]).unwrap();
    let row = arena.apply1(Subtensor::new(&[Slice::new(0, 1)]).into_op(), &[reshaped]).unwrap();
    let fgraph = FunctionGraph::new(arena, vec![x], vec![row]).unwrap();

    assert_eq!(alias_root(&fgraph, row), x);
    assert_eq!(alias_root(&fgraph, x), x);
    assert_eq!(view_tree(&fgraph, row), BTreeSet::from([x, reshaped, row]));
}

#[test]
fn test_alias_root_follows_destroy_maps() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let updated = arena.apply1(Elemwise::new(ScalarOp::Add).with_inplace(Some(1)), &[x, y]).unwrap();
    let fresh = binary(&mut arena, ScalarOp::Mul, x, y);
    let fgraph = FunctionGraph::new(arena, vec![x, y], vec![updated, fresh]).unwrap();

    assert_eq!(alias_root(&fgraph, updated), y);
    assert_eq!(alias_root(&fgraph, fresh), fresh);
    assert!(view_tree(&fgraph, y).contains(&updated));
}

#[test]
fn test_reuse_pattern_covers_computed_aliases() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let sum = binary(&mut arena, ScalarOp::Add, x, y);
    let view = arena.apply1(ViewOp.into_op(), &[sum]).unwrap();
    let passthrough = arena.apply1(ViewOp.into_op(), &[x]).unwrap();
    let fgraph = FunctionGraph::new(arena, vec![x, y], vec![view, passthrough]).unwrap();

    let reuse = infer_reuse_pattern(&fgraph, &[view]);
    assert_eq!(reuse, BTreeSet::from([sum, view]));

    // Inputs are owned by the caller and never part of the pattern.
    let reuse = infer_reuse_pattern(&fgraph, &[passthrough]);
    assert_eq!(reuse, BTreeSet::from([passthrough]));
}
