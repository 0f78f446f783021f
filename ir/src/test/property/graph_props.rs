use proptest::prelude::*;
use proptest::sample::Index;

use super::generators::{arb_input_value, arb_recipe};
use crate::eval::evaluate;
use crate::graph::FunctionGraph;

proptest! {
    #[test]
    fn replacements_keep_the_graph_consistent(
        recipe in arb_recipe(12),
        swaps in prop::collection::vec((any::<Index>(), any::<Index>()), 1..8),
    ) {
        let built = recipe.build();
        let output = built.last();
        let mut fgraph = FunctionGraph::new(built.arena, built.inputs, vec![output]).unwrap();

        for (old, new) in swaps {
            let members = fgraph.variables();
            let old = members[old.index(members.len())];
            let new = built.vars[new.index(built.vars.len())];
            let before = fgraph.to_string();

            if let Err(error) = fgraph.replace(old, new, "random") {
                prop_assert!(!error.is_fatal());
                prop_assert_eq!(fgraph.to_string(), before);
            }
            prop_assert!(fgraph.check_integrity().is_ok());
            prop_assert_eq!(fgraph.toposort().unwrap().len(), fgraph.num_nodes());
        }
    }

    #[test]
    fn evaluation_matches_after_replacing_by_an_equal_graph(
        recipe in arb_recipe(10),
        x in arb_input_value(),
        y in arb_input_value(),
    ) {
        let built = recipe.build();
        let output = built.last();
        let mut fgraph = FunctionGraph::new(built.arena, built.inputs, vec![output]).unwrap();
        let expected = evaluate(&fgraph, &[x.clone(), y.clone()]).unwrap();

        // Rebuild the output node with identical operands; values must not change.
        if let Some(node) = fgraph.var(output).owner_node() {
            let op = fgraph.node(node).op().clone();
            let inputs = fgraph.node(node).inputs().to_vec();
            let copy = fgraph.nodes_mut().apply1(op, &inputs).unwrap();
            fgraph.replace(output, copy, "copy").unwrap();
            prop_assert_eq!(fgraph.outputs(), &[copy]);
        }

        let actual = evaluate(&fgraph, &[x, y]).unwrap();
        prop_assert_eq!(actual, expected);
    }
}
