use std::collections::BTreeSet;

use graft_ir::eval::evaluate;
use graft_ir::{DestroyHandler, Feature, FunctionGraph, TensorData};
use proptest::prelude::*;

use super::generators::{GraphRecipe, arb_input_value, arb_query, arb_recipe, arb_tag};
use crate::catalog::OPTDB;
use crate::config::RewriteConfig;
use crate::driver::{Driver, rewrite_graph};
use crate::levels::OptLevel;

/// Values every intermediate of the unrewritten graph takes, if they all stay in a range where
/// rewritten and original arithmetic agree up to rounding.
fn well_conditioned(recipe: &GraphRecipe, x: &TensorData, y: &TensorData) -> Option<Vec<TensorData>> {
    let built = recipe.build();
    let reference = FunctionGraph::new(built.arena, built.inputs, built.vars).ok()?;
    let values = evaluate(&reference, &[x.clone(), y.clone()]).ok()?;
    let tame = |v: f64| v == 0.0 || (1e-4..=1e4).contains(&v.abs());
    values.iter().all(|data| data.values().iter().all(|&v| tame(v))).then_some(values)
}

fn rewritten(recipe: &GraphRecipe, level: OptLevel) -> FunctionGraph {
    let built = recipe.build();
    let output = built.last();
    let mut fgraph = FunctionGraph::new(built.arena, built.inputs, vec![output]).unwrap();
    rewrite_graph(&mut fgraph, &RewriteConfig::from(level)).unwrap();
    fgraph
}

fn arb_level() -> impl Strategy<Value = OptLevel> {
    prop::sample::select(vec![OptLevel::O1, OptLevel::O2, OptLevel::Stabilization, OptLevel::O4, OptLevel::Unsafe])
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, max_global_rejects: 16_384, ..ProptestConfig::default() })]

    #[test]
    fn rewriting_preserves_values(
        recipe in arb_recipe(8),
        level in arb_level(),
        x in arb_input_value(),
        y in arb_input_value(),
    ) {
        let reference = well_conditioned(&recipe, &x, &y);
        prop_assume!(reference.is_some());
        let reference = reference.unwrap();
        let expected = reference.last().unwrap();

        let fgraph = rewritten(&recipe, level);
        let actual = evaluate(&fgraph, &[x, y]).unwrap();
        prop_assert!(
            actual[0].approx_eq(expected, 1e-7, 1e-9),
            "{}: {:?} != {:?}\n{}",
            level,
            actual[0].values(),
            expected.values(),
            fgraph
        );
    }
}

proptest! {
    #[test]
    fn rewritten_graph_is_consistent(recipe in arb_recipe(12)) {
        let fgraph = rewritten(&recipe, OptLevel::O4);

        prop_assert!(fgraph.check_integrity().is_ok());
        prop_assert_eq!(fgraph.toposort().unwrap().len(), fgraph.num_nodes());
        if let Some(handler) = fgraph.feature::<DestroyHandler>() {
            prop_assert!(handler.validate(&fgraph).is_ok());
        }
    }

    #[test]
    fn equilibrium_passes_are_idempotent(
        recipe in arb_recipe(10),
        group in prop::sample::select(vec!["canonicalize", "stabilize"]),
    ) {
        let built = recipe.build();
        let output = built.last();
        let mut fgraph = FunctionGraph::new(built.arena, built.inputs, vec![output]).unwrap();
        let passes = OPTDB.query(&OptLevel::O4.query());
        let pass = passes.get(group).unwrap();
        let driver = Driver::default();

        let first = driver.run_pass(&mut fgraph, pass).unwrap();
        prop_assume!(!first.capped);
        let before = fgraph.to_string();

        let second = driver.run_pass(&mut fgraph, pass).unwrap();
        prop_assert_eq!(second.total_applied(), 0);
        prop_assert_eq!(fgraph.to_string(), before);
    }

    #[test]
    fn queries_are_deterministic(query in arb_query()) {
        let first = OPTDB.query(&query);
        let second = OPTDB.query(&query);
        prop_assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn excluding_never_adds_passes(query in arb_query(), tag in arb_tag()) {
        let all = OPTDB.query(&query);
        let fewer = OPTDB.query(&query.clone().excluding([tag]));
        let all: BTreeSet<_> = all.names().into_iter().collect();
        prop_assert!(fewer.names().iter().all(|name| all.contains(name)));
    }
}
