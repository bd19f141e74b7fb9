#![allow(dead_code)]

use proptest::prelude::*;

/// Strategy for generating feature identifiers
pub fn feature_id_strategy() -> impl Strategy<Value = String> {
    "f_[a-z0-9]{1,8}"
}

/// Strategy for generating a set of distinct feature ids
pub fn feature_ids_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(feature_id_strategy(), 1..12)
        .prop_map(|ids| ids.into_iter().collect())
}

/// Forward-only dependency edges over `n` features, which can never form a cycle
pub fn acyclic_edges_strategy(n: usize) -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..n.max(1), 0..n.max(1)), 0..n * 2)
        .prop_map(|edges| {
            edges
                .into_iter()
                .filter(|(from, to)| from > to)
                .collect()
        })
}

/// Length of a dependency ring, closed back onto its first feature
pub fn cycle_length_strategy() -> impl Strategy<Value = usize> {
    1usize..8
}

/// Interleaved completions and failures for a batch of features
pub fn feature_outcomes_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..16)
}

/// Strategy for generating retry counts
pub fn retry_count_strategy() -> impl Strategy<Value = u32> {
    1u32..=10
}

/// Strategy for generating jitter samples in [0, 1)
pub fn jitter_sample_strategy() -> impl Strategy<Value = f64> {
    0.0f64..1.0
}

/// Completed, failed and pending feature counts with at least one feature
pub fn feature_partition_strategy() -> impl Strategy<Value = (usize, usize, usize)> {
    (0usize..6, 0usize..6, 0usize..6).prop_filter("at least one feature", |(c, f, p)| c + f + p > 0)
}

/// Number of components in a cross-component dependency ring
pub fn component_ring_strategy() -> impl Strategy<Value = usize> {
    2usize..6
}
