//! Debug-time verification helpers for hypercube layouts.
//!
//! Intended for tests and debug builds to catch malformed layouts early.
//! They panic on violation.

use std::collections::BTreeSet;

/// The assignment must fit the worker budget with every dimension at least 1.
pub fn assert_within_budget(dim_sizes: &[usize], workers: usize) {
    assert!(
        dim_sizes.iter().all(|&d| d >= 1),
        "dimension sizes {dim_sizes:?} contain a zero"
    );
    let cells: usize = dim_sizes.iter().product();
    assert!(
        cells <= workers,
        "hypercube {dim_sizes:?} has {cells} cells for {workers} workers"
    );
}

/// Across all voxels, each worker id in `0..Π dim_sizes` appears exactly once.
pub fn assert_exact_cover(partition: &[Vec<usize>], dim_sizes: &[usize]) {
    let cells: usize = dim_sizes.iter().product();
    let mut seen = BTreeSet::new();
    for wid in partition.iter().flatten() {
        assert!(*wid < cells, "worker {wid} outside hypercube of {cells} cells");
        assert!(seen.insert(*wid), "worker {wid} assigned twice");
    }
    assert_eq!(seen.len(), cells, "cell partition misses workers");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "assigned twice")]
    fn test_duplicate_worker_detected() {
        assert_exact_cover(&[vec![0, 1], vec![1]], &[2]);
    }

    #[test]
    #[should_panic(expected = "cells for")]
    fn test_over_budget_detected() {
        assert_within_budget(&[2, 3], 5);
    }

    #[test]
    fn test_valid_layout_passes() {
        assert_within_budget(&[2, 2], 4);
        assert_exact_cover(&[vec![0, 2], vec![1, 3]], &[2, 2]);
    }
}
