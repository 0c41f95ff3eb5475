//! # Property-Based Tests
//!
//! Canonicalization and persistence invariants checked with proptest.

use postcoord_core::primitives::{CANONICAL_CLOSE_TO_USER_FORM_REFSET, CLASSIFIABLE_FORM_REFSET};
use postcoord_core::{ConceptId, ExpressionParser, ExpressionRepository, ExpressionStore, ScgParser};
use proptest::collection::btree_set;
use proptest::prelude::*;

const MODULE: ConceptId = ConceptId(11_000_003_104);

fn ids(max: usize) -> impl Strategy<Value = Vec<u64>> {
    btree_set(100_000u64..999_999_999, 1..max).prop_map(|set| set.into_iter().collect())
}

/// The same ids in their generated order and in a shuffled order.
fn ids_and_permutation(max: usize) -> impl Strategy<Value = (Vec<u64>, Vec<u64>)> {
    ids(max).prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
}

fn canonical(text: &str) -> String {
    ScgParser.parse(text).expect("parse").canonical()
}

fn focus_text(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(" + ")
}

fn group_text(values: &[u64]) -> String {
    let attributes = values
        .iter()
        .enumerate()
        .map(|(i, v)| format!("{} = {v}", 405_813_007 + i as u64 * 10))
        .collect::<Vec<_>>();
    format!("{{ {} }}", attributes.join(", "))
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Focus concept order never changes the canonical form.
    #[test]
    fn focus_order_is_irrelevant((ids, shuffled) in ids_and_permutation(6)) {
        prop_assert_eq!(canonical(&focus_text(&ids)), canonical(&focus_text(&shuffled)));
    }

    /// Attribute order inside a group never changes the canonical form.
    #[test]
    fn attribute_order_is_irrelevant(values in ids(6)) {
        let attributes: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{} = {v}", 405_813_007 + i as u64 * 10))
            .collect();
        let mut reversed = attributes.clone();
        reversed.reverse();

        let forward = format!("71388002 : {{ {} }}", attributes.join(", "));
        let backward = format!("71388002 : {{ {} }}", reversed.join(", "));
        prop_assert_eq!(canonical(&forward), canonical(&backward));
    }

    /// Group order never changes the canonical form.
    #[test]
    fn group_order_is_irrelevant(a in ids(4), b in ids(4)) {
        let forward = format!("71388002 : {}, {}", group_text(&a), group_text(&b));
        let backward = format!("71388002 : {}, {}", group_text(&b), group_text(&a));
        prop_assert_eq!(canonical(&forward), canonical(&backward));
    }

    /// Spacing and labels never reach the canonical form.
    #[test]
    fn whitespace_and_labels_are_dropped(ids in ids(5), pad in "[ \t\n]{0,3}") {
        let plain = focus_text(&ids);
        let decorated = ids
            .iter()
            .map(|id| format!("{pad}{id}{pad}|Label {id}|{pad}"))
            .collect::<Vec<_>>()
            .join("+");

        let result = canonical(&decorated);
        prop_assert_eq!(&result, &canonical(&plain));
        prop_assert!(!result.chars().any(char::is_whitespace));
        prop_assert!(!result.contains('|'));
    }

    /// Parsing the canonical form again is a fixed point.
    #[test]
    fn canonical_form_reparses_to_itself(ids in ids(4), values in ids(4)) {
        let text = format!("<<< {} : {}", focus_text(&ids), group_text(&values));
        let once = canonical(&text);
        prop_assert_eq!(canonical(&once), once);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Flushing in small chunks persists the same state as a single flush.
    #[test]
    fn flush_threshold_does_not_change_state(values in ids(40), threshold in 1usize..8) {
        let inputs: Vec<String> = values
            .iter()
            .map(|v| format!("71388002 : 405813007 = ( 15497006 : 272741003 = {v} )"))
            .collect();

        let chunked = ExpressionRepository::in_memory().with_flush_threshold(threshold);
        let single = ExpressionRepository::in_memory().with_flush_threshold(usize::MAX);
        let a = chunked
            .create_expressions_all_or_nothing(&inputs, "MAIN", MODULE)
            .expect("batch call");
        let b = single
            .create_expressions_all_or_nothing(&inputs, "MAIN", MODULE)
            .expect("batch call");
        prop_assert_eq!(a, b);

        for refset in [CANONICAL_CLOSE_TO_USER_FORM_REFSET, CLASSIFIABLE_FORM_REFSET] {
            prop_assert_eq!(
                chunked.store().members("MAIN", refset).expect("members"),
                single.store().members("MAIN", refset).expect("members")
            );
        }
        prop_assert_eq!(
            chunked.store().concept_count("MAIN").expect("count"),
            values.len() * 2
        );
        prop_assert_eq!(
            chunked.store().concept_count("MAIN").expect("count"),
            single.store().concept_count("MAIN").expect("count")
        );
    }
}
