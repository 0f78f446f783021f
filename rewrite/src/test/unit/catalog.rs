use graft_dtype::DType;
use graft_ir::ops::{Alloc, Assert, Composite, Elementwise, Elemwise, IncSubtensor, Reshape, ScalarOp, Slice, ViewOp};
use graft_ir::{DestroyHandler, Feature, FunctionGraph, IntoOpRef, NodeArena, TensorData, TensorType, VarId};

use crate::compile::{In, compile};
use crate::config::RewriteConfig;
use crate::levels::OptLevel;
use crate::test::{binary, families, fvec, op_names, rewrite_at, scalar, unary, vector};

fn output_constant(fgraph: &FunctionGraph) -> &TensorData {
    fgraph.var(fgraph.outputs()[0]).constant().expect("output should be a constant")
}

/// Shape and fill value of the `Alloc` producing the first output.
fn output_fill(fgraph: &FunctionGraph) -> (Vec<usize>, f64) {
    let owner = fgraph.var(fgraph.outputs()[0]).owner_node().expect("output should be computed");
    let apply = fgraph.node(owner);
    let alloc = apply.op_as::<Alloc>().expect("output should be an Alloc");
    let value = fgraph.var(apply.inputs()[0]).constant().and_then(|data| data.as_scalar());
    (alloc.shape().to_vec(), value.expect("fill should be a 0-d constant"))
}

fn only_node_scalar(fgraph: &FunctionGraph) -> ScalarOp {
    let nodes = fgraph.toposort().unwrap();
    assert_eq!(nodes.len(), 1, "{:?}", op_names(fgraph));
    fgraph.node(nodes[0]).op_as::<Elemwise>().unwrap().scalar()
}

// ===== Merging =====

#[test]
fn test_merge_shares_common_subexpression() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let (two, three) = (scalar(&mut arena, 2.0), scalar(&mut arena, 3.0));
    let sum1 = binary(&mut arena, ScalarOp::Add, x, y);
    let sum2 = binary(&mut arena, ScalarOp::Add, x, y);
    let out1 = binary(&mut arena, ScalarOp::Mul, sum1, two);
    let out2 = binary(&mut arena, ScalarOp::Mul, sum2, three);

    let (fgraph, report) = rewrite_at(arena, vec![x, y], vec![out1, out2], OptLevel::O1);

    let adds = op_names(&fgraph).iter().filter(|name| *name == "Elemwise{add}").count();
    assert_eq!(adds, 1);
    assert_eq!(fgraph.num_nodes(), 3);
    assert_eq!(report.fired("merge1"), 1);
}

#[test]
fn test_merge_equal_constants() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let (c1, c2) = (scalar(&mut arena, 2.0), scalar(&mut arena, 2.0));
    let out1 = binary(&mut arena, ScalarOp::Mul, x, c1);
    let out2 = binary(&mut arena, ScalarOp::Mul, x, c2);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out1, out2], OptLevel::Merge);

    assert_eq!(fgraph.num_nodes(), 1);
    assert_eq!(fgraph.outputs()[0], fgraph.outputs()[1]);
}

// ===== Shapes =====

fn reshape_chain_graph(target: &[usize]) -> (FunctionGraph, VarId) {
    let mut arena = NodeArena::new();
    let x = arena.input("x", TensorType::fixed(DType::Float64, &[2, 3]));
    let flat = arena.apply1(Reshape::new(&[6]).into_op(), &[x]).unwrap();
    let out = arena.apply1(Reshape::new(target).into_op(), &[flat]).unwrap();
    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O1);
    (fgraph, x)
}

#[test]
fn test_reshape_chain_collapses() {
    let (fgraph, x) = reshape_chain_graph(&[3, 2]);
    let nodes = fgraph.toposort().unwrap();
    assert_eq!(nodes.len(), 1);
    let apply = fgraph.node(nodes[0]);
    assert_eq!(apply.op_as::<Reshape>().unwrap().shape(), &[3, 2]);
    assert_eq!(apply.inputs(), &[x]);
}

#[test]
fn test_reshape_back_to_input_shape_disappears() {
    let (fgraph, x) = reshape_chain_graph(&[2, 3]);
    assert_eq!(fgraph.outputs(), &[x]);
    assert_eq!(fgraph.num_nodes(), 0);
}

// ===== Constant folding =====

#[test]
fn test_constant_folding() {
    let mut arena = NodeArena::new();
    let (two, three) = (scalar(&mut arena, 2.0), scalar(&mut arena, 3.0));
    let out = binary(&mut arena, ScalarOp::Add, two, three);

    let (fgraph, report) = rewrite_at(arena, vec![], vec![out], OptLevel::O1);

    assert_eq!(output_constant(&fgraph).as_scalar(), Some(5.0));
    assert_eq!(fgraph.num_nodes(), 0);
    assert_eq!(report.fired("constant_folding"), 1);
}

#[test]
fn test_constant_folding_failure_is_skipped() {
    let mut arena = NodeArena::new();
    let (one, zero) = (scalar(&mut arena, 1.0), scalar(&mut arena, 0.0));
    let out = arena.apply1(Assert::new("boom").into_op(), &[one, zero]).unwrap();

    let (fgraph, report) = rewrite_at(arena, vec![], vec![out], OptLevel::O1);

    assert_eq!(families(&fgraph), ["assert"]);
    assert!(report.skipped().any(|skipped| skipped.rewrite == "constant_folding"));
}

// ===== Algebraic identities =====

#[test]
fn test_add_zero() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let zero = scalar(&mut arena, 0.0);
    let out = binary(&mut arena, ScalarOp::Add, zero, x);

    let (fgraph, report) = rewrite_at(arena, vec![x], vec![out], OptLevel::O1);
    assert_eq!(fgraph.outputs(), &[x]);
    assert_eq!(report.fired("add_zero"), 1);
}

#[test]
fn test_add_zero_keeps_broadcast() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", TensorType::scalar(DType::Float64));
    let zeros = arena.constant(TensorData::zeros(DType::Float64, &[3]));
    let out = binary(&mut arena, ScalarOp::Add, x, zeros);

    let (fgraph, report) = rewrite_at(arena, vec![x], vec![out], OptLevel::O1);
    assert_eq!(op_names(&fgraph), ["Elemwise{add}"]);
    assert_eq!(report.fired("add_zero"), 0);
}

#[test]
fn test_mul_one() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let one = scalar(&mut arena, 1.0);
    let out = binary(&mut arena, ScalarOp::Mul, x, one);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O1);
    assert_eq!(fgraph.outputs(), &[x]);
}

#[test]
fn test_mul_zero() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let zero = scalar(&mut arena, 0.0);
    let out = binary(&mut arena, ScalarOp::Mul, x, zero);

    let (fgraph, report) = rewrite_at(arena, vec![x], vec![out], OptLevel::O3);
    assert_eq!(output_fill(&fgraph), (vec![3], 0.0));
    assert_eq!(report.fired("mul_zero"), 1);
}

#[test]
fn test_mul_zero_does_not_materialize_the_fill() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", TensorType::fixed(DType::Float64, &[4096, 4096]));
    let zero = scalar(&mut arena, 0.0);
    let out = binary(&mut arena, ScalarOp::Mul, x, zero);

    let (fgraph, report) = rewrite_at(arena, vec![x], vec![out], OptLevel::O4);
    assert_eq!(report.fired("mul_zero"), 1);
    assert_eq!(output_fill(&fgraph), (vec![4096, 4096], 0.0));
    for var in fgraph.variables() {
        if let Some(data) = fgraph.var(var).constant() {
            assert_eq!(data.size(), 1, "{var} holds a dense constant");
        }
    }
}

#[test]
fn test_fill_feeds_identities() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let zero = scalar(&mut arena, 0.0);
    let zeros = binary(&mut arena, ScalarOp::Mul, x, zero);
    let out = binary(&mut arena, ScalarOp::Add, zeros, y);

    let (fgraph, report) = rewrite_at(arena, vec![x, y], vec![out], OptLevel::O3);
    assert_eq!(fgraph.outputs(), &[y]);
    assert_eq!(report.fired("add_zero"), 1);
}

#[test]
fn test_mul_zero_not_in_fast_compile() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let zero = scalar(&mut arena, 0.0);
    let out = binary(&mut arena, ScalarOp::Mul, x, zero);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O1);
    assert_eq!(op_names(&fgraph), ["Elemwise{mul}"]);
}

#[test]
fn test_div_one() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let one = scalar(&mut arena, 1.0);
    let out = binary(&mut arena, ScalarOp::TrueDiv, x, one);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O3);
    assert_eq!(fgraph.outputs(), &[x]);
}

#[test]
fn test_div_one_keeps_the_upcast() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", TensorType::fixed(DType::Int64, &[3]));
    let one = arena.constant(TensorData::scalar(DType::Int64, 1.0));
    let out = binary(&mut arena, ScalarOp::TrueDiv, x, one);

    let (fgraph, report) = rewrite_at(arena, vec![x], vec![out], OptLevel::O3);
    assert_eq!(only_node_scalar(&fgraph), ScalarOp::TrueDiv);
    assert_eq!(report.fired("div_one"), 0);
}

#[test]
fn test_div_one_does_not_commute() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let one = scalar(&mut arena, 1.0);
    let out = binary(&mut arena, ScalarOp::TrueDiv, one, x);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O3);
    assert_eq!(only_node_scalar(&fgraph), ScalarOp::TrueDiv);
}

#[test]
fn test_neg_neg() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let once = unary(&mut arena, ScalarOp::Neg, x);
    let twice = unary(&mut arena, ScalarOp::Neg, once);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![twice], OptLevel::O1);
    assert_eq!(fgraph.outputs(), &[x]);
}

#[test]
fn test_sub_self() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let out = binary(&mut arena, ScalarOp::Sub, x, x);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O3);
    assert_eq!(output_fill(&fgraph), (vec![3], 0.0));
}

#[test]
fn test_div_self_only_when_unsafe() {
    let build = || {
        let mut arena = NodeArena::new();
        let x = arena.input("x", fvec(3));
        let out = binary(&mut arena, ScalarOp::TrueDiv, x, x);
        (arena, x, out)
    };

    let (arena, x, out) = build();
    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O3);
    assert_eq!(only_node_scalar(&fgraph), ScalarOp::TrueDiv);

    let (arena, x, out) = build();
    let (fgraph, report) = rewrite_at(arena, vec![x], vec![out], OptLevel::Unsafe);
    assert_eq!(output_fill(&fgraph), (vec![3], 1.0));
    assert_eq!(report.fired("div_self"), 1);
}

// ===== Stabilization =====

#[test]
fn test_log1p() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let one = scalar(&mut arena, 1.0);
    let sum = binary(&mut arena, ScalarOp::Add, one, x);
    let out = unary(&mut arena, ScalarOp::Log, sum);

    let (fgraph, report) = rewrite_at(arena, vec![x], vec![out], OptLevel::Stabilization);
    assert_eq!(only_node_scalar(&fgraph), ScalarOp::Log1p);
    assert_eq!(report.fired("log1p"), 1);

    let values = graft_ir::eval::evaluate(&fgraph, &[vector(&[0.0, 1e-20, 1.0])]).unwrap();
    assert_eq!(values[0].values()[1], 1e-20);
}

#[test]
fn test_log_exp() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let exp = unary(&mut arena, ScalarOp::Exp, x);
    let out = unary(&mut arena, ScalarOp::Log, exp);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::Stabilization);
    assert_eq!(fgraph.outputs(), &[x]);
}

#[test]
fn test_stabilize_not_in_fast_compile() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let exp = unary(&mut arena, ScalarOp::Exp, x);
    let out = unary(&mut arena, ScalarOp::Log, exp);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O1);
    assert_eq!(op_names(&fgraph), ["Elemwise{exp}", "Elemwise{log}"]);
}

// ===== Asserts and views =====

#[test]
fn test_useless_assert_removed() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let always = scalar(&mut arena, 1.0);
    let out = arena.apply1(Assert::new("x is fine").into_op(), &[x, always]).unwrap();

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![out], OptLevel::O1);
    assert_eq!(fgraph.outputs(), &[x]);
}

#[test]
fn test_useless_assert_keeps_unknown_conditions() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let cond = arena.input("cond", fvec(3));
    let always = scalar(&mut arena, 1.0);
    let out = arena.apply1(Assert::new("x is fine").into_op(), &[x, always, cond]).unwrap();

    let (fgraph, _) = rewrite_at(arena, vec![x, cond], vec![out], OptLevel::O1);
    let nodes = fgraph.toposort().unwrap();
    assert_eq!(nodes.len(), 1);
    let apply = fgraph.node(nodes[0]);
    assert_eq!(apply.op_as::<Assert>().unwrap().message(), "x is fine");
    assert_eq!(apply.inputs(), &[x, cond]);
}

#[test]
fn test_remove_all_assert_only_when_unsafe() {
    let build = || {
        let mut arena = NodeArena::new();
        let x = arena.input("x", fvec(3));
        let cond = arena.input("cond", fvec(3));
        let out = arena.apply1(Assert::new("checked").into_op(), &[x, cond]).unwrap();
        (arena, vec![x, cond], out)
    };

    let (arena, inputs, out) = build();
    let (fgraph, _) = rewrite_at(arena, inputs, vec![out], OptLevel::O3);
    assert_eq!(families(&fgraph), ["assert"]);

    let (arena, inputs, out) = build();
    let x = inputs[0];
    let (fgraph, _) = rewrite_at(arena, inputs, vec![out], OptLevel::Unsafe);
    assert_eq!(fgraph.outputs(), &[x]);
}

#[test]
fn test_useless_view() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let view = arena.apply1(ViewOp.into_op(), &[x]).unwrap();
    let out = unary(&mut arena, ScalarOp::Exp, view);

    let (fgraph, report) = rewrite_at(arena, vec![x], vec![out], OptLevel::O3);
    assert_eq!(op_names(&fgraph), ["Elemwise{exp}"]);
    assert_eq!(report.fired("useless_view"), 1);
}

#[test]
fn test_view_returned_as_output_stays() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let view = arena.apply1(ViewOp.into_op(), &[x]).unwrap();

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![view], OptLevel::O3);
    assert_eq!(families(&fgraph), ["view"]);
}

// ===== Fusion =====

#[test]
fn test_fusion_builds_one_composite() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let z = arena.input("z", fvec(3));
    let sum = binary(&mut arena, ScalarOp::Add, x, y);
    let exp = unary(&mut arena, ScalarOp::Exp, sum);
    let out = binary(&mut arena, ScalarOp::Mul, exp, z);

    let (fgraph, report) = rewrite_at(arena, vec![x, y, z], vec![out], OptLevel::O2);

    let nodes = fgraph.toposort().unwrap();
    assert_eq!(nodes.len(), 1);
    let apply = fgraph.node(nodes[0]);
    assert!(apply.op().is::<Composite>(), "{}", apply.op());
    assert_eq!(apply.inputs(), &[x, y, z]);
    assert_eq!(report.fired("fuse_elemwise"), 2);

    let values = graft_ir::eval::evaluate(
        &fgraph,
        &[vector(&[0.0, 1.0, 2.0]), vector(&[1.0, 1.0, 1.0]), vector(&[2.0, 2.0, 2.0])],
    )
    .unwrap();
    let expected = vector(&[2.0 * 1f64.exp(), 2.0 * 2f64.exp(), 2.0 * 3f64.exp()]);
    assert!(values[0].approx_eq(&expected, 1e-12, 0.0));
}

#[test]
fn test_fusion_leaves_shared_producers() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let sum = binary(&mut arena, ScalarOp::Add, x, y);
    let exp = unary(&mut arena, ScalarOp::Exp, sum);
    let neg = unary(&mut arena, ScalarOp::Neg, sum);

    let (fgraph, report) = rewrite_at(arena, vec![x, y], vec![exp, neg], OptLevel::O2);
    assert_eq!(fgraph.num_nodes(), 3);
    assert_eq!(report.fired("fuse_elemwise"), 0);
}

#[test]
fn test_fusion_leaves_graph_outputs() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let exp = unary(&mut arena, ScalarOp::Exp, x);
    let out = unary(&mut arena, ScalarOp::Neg, exp);

    let (fgraph, _) = rewrite_at(arena, vec![x], vec![exp, out], OptLevel::O2);
    assert_eq!(op_names(&fgraph), ["Elemwise{exp}", "Elemwise{neg}"]);
}

// ===== Updates into a zero buffer =====

#[test]
fn test_serialized_updates_run_in_place() {
    let mut arena = NodeArena::new();
    let a = arena.input("a", fvec(2));
    let b = arena.input("b", fvec(2));
    let zero = scalar(&mut arena, 0.0);
    let buffer = arena.apply1(Alloc::new(&[4]).into_op(), &[zero]).unwrap();
    let first = arena.apply1(IncSubtensor::inc(&[Slice::new(0, 2)]).into_op(), &[buffer, a]).unwrap();
    let second = arena.apply1(IncSubtensor::inc(&[Slice::new(2, 4)]).into_op(), &[buffer, b]).unwrap();
    let out = binary(&mut arena, ScalarOp::Add, first, second);

    let compiled = compile(arena, &[a.into(), b.into()], &[out.into()], &RewriteConfig::default()).unwrap();
    let fgraph = &compiled.fgraph;

    assert_eq!(compiled.report.fired("serialize_inc_subtensor"), 1);
    assert_eq!(compiled.report.fired("inplace_inc_subtensor"), 2);
    let updates: Vec<_> =
        compiled.order.iter().filter_map(|&node| fgraph.node(node).op_as::<IncSubtensor>()).collect();
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|inc| inc.is_inplace()));
    assert!(!op_names(fgraph).iter().any(|name| name.starts_with("Elemwise")));
    fgraph.feature::<DestroyHandler>().unwrap().validate(fgraph).unwrap();

    let values = compiled.evaluate(&[vector(&[1.0, 2.0]), vector(&[3.0, 4.0])]).unwrap();
    assert_eq!(values[0].values(), &[1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_overlapping_updates_are_not_serialized() {
    let mut arena = NodeArena::new();
    let a = arena.input("a", fvec(2));
    let b = arena.input("b", fvec(2));
    let zero = scalar(&mut arena, 0.0);
    let buffer = arena.apply1(Alloc::new(&[4]).into_op(), &[zero]).unwrap();
    let first = arena.apply1(IncSubtensor::inc(&[Slice::new(0, 2)]).into_op(), &[buffer, a]).unwrap();
    let second = arena.apply1(IncSubtensor::inc(&[Slice::new(1, 3)]).into_op(), &[buffer, b]).unwrap();
    let out = binary(&mut arena, ScalarOp::Add, first, second);

    let (fgraph, report) = rewrite_at(arena, vec![a, b], vec![out], OptLevel::O3);
    assert_eq!(report.fired("serialize_inc_subtensor"), 0);
    assert!(op_names(&fgraph).contains(&"Elemwise{add}".to_string()));
}

// ===== In-place elementwise =====

fn inplace_of(fgraph: &FunctionGraph, var: VarId) -> Option<usize> {
    let owner = fgraph.var(var).owner_node()?;
    fgraph.node(owner).op_as::<Elemwise>()?.inplace()
}

#[test]
fn test_inplace_elemwise_on_mutable_input() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let out = binary(&mut arena, ScalarOp::Add, x, y);

    let inputs = [In::new(x).mutable(true), In::new(y)];
    let compiled = compile(arena, &inputs, &[out.into()], &RewriteConfig::default()).unwrap();

    let fgraph = &compiled.fgraph;
    assert_eq!(inplace_of(fgraph, fgraph.outputs()[0]), Some(0));
    assert_eq!(compiled.report.fired("inplace_elemwise"), 1);
}

#[test]
fn test_inplace_elemwise_leaves_protected_inputs() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let out = binary(&mut arena, ScalarOp::Add, x, y);

    let compiled = compile(arena, &[x.into(), y.into()], &[out.into()], &RewriteConfig::default()).unwrap();

    let fgraph = &compiled.fgraph;
    assert_eq!(inplace_of(fgraph, fgraph.outputs()[0]), None);
    assert_eq!(compiled.report.fired("inplace_elemwise"), 0);
}

#[test]
fn test_inplace_elemwise_on_intermediate() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(3));
    let y = arena.input("y", fvec(3));
    let sum = binary(&mut arena, ScalarOp::Add, x, y);
    let out = unary(&mut arena, ScalarOp::Exp, sum);

    let config = RewriteConfig::builder().extra("-elemwise_fusion".parse().unwrap()).build();
    let compiled = compile(arena, &[x.into(), y.into()], &[out.into()], &config).unwrap();

    let fgraph = &compiled.fgraph;
    assert_eq!(families(fgraph), ["elemwise", "elemwise"]);
    assert_eq!(inplace_of(fgraph, fgraph.outputs()[0]), Some(0));
    assert_eq!(inplace_of(fgraph, sum), None);

    let values = compiled.evaluate(&[vector(&[0.0, 1.0, 2.0]), vector(&[0.0, 0.0, 0.0])]).unwrap();
    assert!(values[0].approx_eq(&vector(&[1.0, 1f64.exp(), 2f64.exp()]), 1e-12, 0.0));
}
