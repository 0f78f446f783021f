//! Generators for property-based testing.
//!
//! A [`GraphRecipe`] is a list of elementwise steps over a pool holding the two inputs, the
//! scalar constants the algebraic rewrites look for, and every step built so far.

use graft_ir::ops::{Elemwise, ScalarOp};
use graft_ir::{IntoOpRef, NodeArena, TensorData, VarId};
use proptest::prelude::*;
use proptest::sample::Index;
use strum::IntoEnumIterator;

use crate::query::Query;
use crate::test::{fvec, scalar, vector};

pub const WIDTH: usize = 3;

/// Scalar constants seeded into every pool.
pub const CONSTANTS: [f64; 3] = [0.0, 1.0, 2.0];

#[derive(Debug, Clone)]
pub struct GraphRecipe {
    /// `(op, lhs, rhs)`; unary ops ignore `rhs`.
    pub steps: Vec<(ScalarOp, Index, Index)>,
}

pub struct BuiltGraph {
    pub arena: NodeArena,
    pub inputs: Vec<VarId>,
    /// Inputs, constants, then one variable per step.
    pub vars: Vec<VarId>,
}

impl BuiltGraph {
    pub fn last(&self) -> VarId {
        self.vars[self.vars.len() - 1]
    }
}

impl GraphRecipe {
    pub fn build(&self) -> BuiltGraph {
        let mut arena = NodeArena::new();
        let inputs = vec![arena.input("x", fvec(WIDTH)), arena.input("y", fvec(WIDTH))];
        let mut vars = inputs.clone();
        for value in CONSTANTS {
            vars.push(scalar(&mut arena, value));
        }
        for (op, lhs, rhs) in &self.steps {
            let lhs = vars[lhs.index(vars.len())];
            let rhs = vars[rhs.index(vars.len())];
            let args: &[VarId] = if op.arity() == 1 { &[lhs] } else { &[lhs, rhs] };
            let out = arena.apply1(Elemwise::new(*op).into_op(), args).expect("elementwise over broadcastable shapes");
            vars.push(out);
        }
        BuiltGraph { arena, inputs, vars }
    }
}

pub fn arb_scalar_op() -> impl Strategy<Value = ScalarOp> {
    prop::sample::select(ScalarOp::iter().collect::<Vec<_>>())
}

pub fn arb_recipe(max_steps: usize) -> impl Strategy<Value = GraphRecipe> {
    prop::collection::vec((arb_scalar_op(), any::<Index>(), any::<Index>()), 1..=max_steps)
        .prop_map(|steps| GraphRecipe { steps })
}

/// Input values in `[0.5, 4)`.
pub fn arb_input_value() -> impl Strategy<Value = TensorData> {
    prop::collection::vec(0.5f64..4.0, WIDTH).prop_map(|values| vector(&values))
}

/// Tags and entry names of the standard database, plus one nothing carries.
const TAGS: &[&str] = &[
    "fast_run",
    "fast_compile",
    "merge",
    "stabilize",
    "fusion",
    "inplace",
    "unsafe",
    "canonicalize",
    "specialize",
    "merge2",
    "constant_folding",
    "missing",
];

pub fn arb_tag() -> impl Strategy<Value = &'static str> {
    prop::sample::select(TAGS)
}

pub fn arb_query() -> impl Strategy<Value = Query> {
    (
        prop::collection::vec(arb_tag(), 0..4),
        prop::collection::vec(arb_tag(), 0..2),
        prop::collection::vec(arb_tag(), 0..3),
    )
        .prop_map(|(include, require, exclude)| Query::new().including(include).requiring(require).excluding(exclude))
}
