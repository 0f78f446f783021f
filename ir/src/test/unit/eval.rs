use graft_dtype::DType;

use crate::error::Error;
use crate::eval::evaluate;
use crate::graph::{FunctionGraph, NodeArena};
use crate::op::IntoOpRef;
use crate::ops::{Assert, ScalarOp};
use crate::test::{binary, fvec, sum_times_two, vector};
use crate::types::TensorType;
use crate::value::TensorData;

#[test]
fn test_evaluate() {
    let (arena, x, y, _, out) = sum_times_two();
    let fgraph = FunctionGraph::new(arena, vec![x, y], vec![out]).unwrap();

    let result = evaluate(&fgraph, &[vector(&[1.0, 2.0, 3.0]), vector(&[1.0, 1.0, 1.0])]).unwrap();
    assert_eq!(result, vec![vector(&[4.0, 6.0, 8.0])]);
}

#[test]
fn test_evaluate_returns_inputs_and_constants() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(2));
    let c = arena.constant(vector(&[5.0, 6.0]));
    let fgraph = FunctionGraph::new(arena, vec![x], vec![x, c]).unwrap();

    let result = evaluate(&fgraph, &[vector(&[1.0, 2.0])]).unwrap();
    assert_eq!(result, vec![vector(&[1.0, 2.0]), vector(&[5.0, 6.0])]);
}

#[test]
fn test_wrong_input_count() {
    let (arena, x, y, _, out) = sum_times_two();
    let fgraph = FunctionGraph::new(arena, vec![x, y], vec![out]).unwrap();

    let err = evaluate(&fgraph, &[vector(&[1.0, 2.0, 3.0])]).unwrap_err();
    assert!(matches!(err, Error::ValueCount { expected: 2, actual: 1 }));
}

#[test]
fn test_wrong_input_type() {
    let (arena, x, y, _, out) = sum_times_two();
    let fgraph = FunctionGraph::new(arena, vec![x, y], vec![out]).unwrap();

    let short = vector(&[1.0, 2.0]);
    let err = evaluate(&fgraph, &[short.clone(), short]).unwrap_err();
    assert!(matches!(err, Error::ValueTypeMismatch { .. }));

    let ints = TensorData::new(DType::Int64, &[3], vec![1.0, 2.0, 3.0]).unwrap();
    assert!(evaluate(&fgraph, &[ints.clone(), ints]).is_err());
}

#[test]
fn test_failed_assertion_surfaces() {
    let mut arena = NodeArena::new();
    let x = arena.input("x", fvec(2));
    let cond = arena.input("cond", TensorType::scalar(DType::Bool));
    let checked = arena.apply1(Assert::new("cond").into_op(), &[x, cond]).unwrap();
    let doubled = binary(&mut arena, ScalarOp::Add, checked, checked);
    let fgraph = FunctionGraph::new(arena, vec![x, cond], vec![doubled]).unwrap();

    let x_value = vector(&[1.0, 2.0]);
    let pass = TensorData::scalar(DType::Bool, 1.0);
    let fail = TensorData::scalar(DType::Bool, 0.0);
    assert_eq!(evaluate(&fgraph, &[x_value.clone(), pass]).unwrap(), vec![vector(&[2.0, 4.0])]);
    assert!(matches!(evaluate(&fgraph, &[x_value, fail]), Err(Error::AssertionFailed { .. })));
}
