//! Breadth-first search over dimension-size assignments.
//!
//! Starting from the all-ones vector, every step tries incrementing each
//! dimension by one and enqueues the result when its product stays within the
//! worker budget. The best workload seen over all visited vectors wins; ties
//! keep the vector found first. The search is a bounded heuristic: the state
//! space is finite because `product <= workers`, and it is additionally capped
//! by `max_states`, but the result is not guaranteed to be globally optimal.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use shardplan_core::error::{Error, Result};

use crate::cost::{workload, ReverseIndex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub dim_sizes: Vec<usize>,
    pub workload: f64,
    /// Number of distinct vectors enqueued, including the start vector.
    pub visited: usize,
}

fn product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Choose `num_dims` partition counts whose product does not exceed `workers`.
pub fn search_dim_sizes(
    workers: usize,
    num_dims: usize,
    child_sizes: &[u64],
    index: &ReverseIndex,
    max_states: usize,
) -> Result<Assignment> {
    if workers == 0 {
        return Err(Error::Config("worker count must be at least 1".into()));
    }

    let start = vec![1usize; num_dims];
    let mut best = Assignment {
        workload: workload(&start, child_sizes, index),
        dim_sizes: start.clone(),
        visited: 1,
    };
    if num_dims == 0 {
        return Ok(best);
    }

    let mut visited: HashSet<Vec<usize>> = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start.clone());
    queue.push_back(start);

    while let Some(dims) = queue.pop_front() {
        let w = workload(&dims, child_sizes, index);
        if w < best.workload {
            best.workload = w;
            best.dim_sizes = dims.clone();
        }
        for i in 0..dims.len() {
            let mut next = dims.clone();
            next[i] += 1;
            let fits = product(&next).is_some_and(|p| p <= workers);
            if fits && visited.insert(next.clone()) {
                if visited.len() > max_states {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        dims = num_dims,
                        workers,
                        limit = max_states,
                        "hypercube search hit its state cap"
                    );
                    return Err(Error::SearchBound {
                        visited: visited.len(),
                        limit: max_states,
                    });
                }
                queue.push_back(next);
            }
        }
    }

    best.visited = visited.len();
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> ReverseIndex {
        // R(x, y) ⋈ S(y, z) ⋈ T(z, x)
        ReverseIndex::build(
            &[2, 2, 2],
            &[
                vec![(0, 0), (2, 1)],
                vec![(0, 1), (1, 0)],
                vec![(1, 1), (2, 0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_triangle_on_eight_workers_is_cubic() {
        let a = search_dim_sizes(8, 3, &[1000, 1000, 1000], &triangle(), 10_000).unwrap();
        assert_eq!(a.dim_sizes, vec![2, 2, 2]);
        assert_eq!(a.workload, 750.0);
    }

    #[test]
    fn test_product_within_budget_and_not_worse_than_ones() {
        let idx = triangle();
        for workers in 1..=20 {
            let sizes = [10, 500, 37];
            let a = search_dim_sizes(workers, 3, &sizes, &idx, 100_000).unwrap();
            assert!(a.dim_sizes.iter().product::<usize>() <= workers);
            assert!(a.dim_sizes.iter().all(|&d| d >= 1));
            assert!(a.workload <= workload(&[1, 1, 1], &sizes, &idx));
        }
    }

    #[test]
    fn test_single_worker_keeps_all_ones() {
        let a = search_dim_sizes(1, 3, &[5, 5, 5], &triangle(), 10).unwrap();
        assert_eq!(a.dim_sizes, vec![1, 1, 1]);
        assert_eq!(a.visited, 1);
    }

    #[test]
    fn test_zero_workers_and_state_cap() {
        assert!(matches!(
            search_dim_sizes(0, 3, &[1, 1, 1], &triangle(), 10),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            search_dim_sizes(64, 3, &[1, 1, 1], &triangle(), 5),
            Err(Error::SearchBound { limit: 5, .. })
        ));
    }

    #[test]
    fn test_no_dimensions() {
        let idx = ReverseIndex::build(&[1, 1], &[]).unwrap();
        let a = search_dim_sizes(4, 0, &[3, 4], &idx, 10).unwrap();
        assert!(a.dim_sizes.is_empty());
        assert_eq!(a.workload, 7.0);
    }
}
