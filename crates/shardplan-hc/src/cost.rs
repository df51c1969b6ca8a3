//! Workload model for hypercube shuffles.
//!
//! A child relation of size `n` whose join columns touch dimensions `D` is
//! replicated across every other dimension, so each worker receives about
//! `n / Π_{d ∈ D} dim_sizes[d]` of its tuples. The workload of an assignment
//! is that quantity summed over all children.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use shardplan_core::error::{Error, Result};

/// For each column of each child, the hypercube dimension it is mapped to
/// (`None` when the column does not take part in the join).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseIndex {
    columns: Vec<Vec<Option<usize>>>,
}

impl ReverseIndex {
    /// `conditions[d]` lists the `(child, column)` pairs equated by dimension `d`.
    pub fn build(child_widths: &[usize], conditions: &[Vec<(usize, usize)>]) -> Result<Self> {
        let mut columns: Vec<Vec<Option<usize>>> =
            child_widths.iter().map(|&w| vec![None; w]).collect();
        for (dim, fields) in conditions.iter().enumerate() {
            for &(child, col) in fields {
                let slot = columns
                    .get_mut(child)
                    .and_then(|c| c.get_mut(col))
                    .ok_or_else(|| {
                        Error::Invariant(format!(
                            "join field ({child}, {col}) outside the children's schemes"
                        ))
                    })?;
                *slot = Some(dim);
            }
        }
        Ok(Self { columns })
    }

    pub fn num_children(&self) -> usize {
        self.columns.len()
    }

    pub fn dim_of(&self, child: usize, col: usize) -> Option<usize> {
        self.columns.get(child)?.get(col).copied().flatten()
    }

    /// Distinct dimensions touched by `child`, ascending.
    pub fn dims_of(&self, child: usize) -> BTreeSet<usize> {
        self.columns
            .get(child)
            .map(|cols| cols.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// `(dimension, column)` pairs of `child`, sorted by dimension then column.
    pub fn hashed_fields(&self, child: usize) -> Vec<(usize, usize)> {
        let mut out: Vec<(usize, usize)> = self
            .columns
            .get(child)
            .map(|cols| {
                cols.iter()
                    .enumerate()
                    .filter_map(|(col, dim)| dim.map(|d| (d, col)))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_unstable();
        out
    }
}

/// Estimated tuples per worker under `dim_sizes`.
pub fn workload(dim_sizes: &[usize], child_sizes: &[u64], index: &ReverseIndex) -> f64 {
    child_sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let scale: f64 = index
                .dims_of(i)
                .into_iter()
                .map(|d| dim_sizes.get(d).copied().unwrap_or(1) as f64)
                .product();
            size as f64 / scale
        })
        .sum()
}
