//! Hypercube coordinates and per-child cell partitions.

use std::collections::BTreeMap;

use shardplan_core::error::{Error, Result};

use crate::cost::ReverseIndex;

/// Row-major linearization: `Σ_k coord[k] * Π_{j>k} dim_sizes[j]`.
pub fn coord_to_worker_id(coord: &[usize], dim_sizes: &[usize]) -> usize {
    let mut id = 0;
    for (k, &c) in coord.iter().enumerate() {
        let stride: usize = dim_sizes.get(k + 1..).map_or(1, |s| s.iter().product());
        id += c * stride;
    }
    id
}

/// Every cell of the hypercube in lexicographic order.
fn coordinates(dim_sizes: &[usize]) -> Vec<Vec<usize>> {
    let total: usize = dim_sizes.iter().product();
    let mut out = Vec::with_capacity(total);
    if dim_sizes.iter().any(|&d| d == 0) {
        return out;
    }
    let mut coord = vec![0usize; dim_sizes.len()];
    loop {
        out.push(coord.clone());
        // odometer increment, last dimension fastest
        let mut k = coord.len();
        loop {
            if k == 0 {
                return out;
            }
            k -= 1;
            coord[k] += 1;
            if coord[k] < dim_sizes[k] {
                break;
            }
            coord[k] = 0;
        }
    }
}

/// Group all cells by their projection onto `mapped_dims`, returning the
/// worker ids of each group ordered by voxel.
pub fn cell_partition(dim_sizes: &[usize], mapped_dims: &[usize]) -> Result<Vec<Vec<usize>>> {
    if let Some(&bad) = mapped_dims.iter().find(|&&d| d >= dim_sizes.len()) {
        return Err(Error::Invariant(format!(
            "mapped dimension {bad} outside a {}-dimensional hypercube",
            dim_sizes.len()
        )));
    }
    let mut groups: BTreeMap<Vec<usize>, Vec<usize>> = BTreeMap::new();
    for coord in coordinates(dim_sizes) {
        let voxel = mapped_dims.iter().map(|&d| coord[d]).collect();
        groups
            .entry(voxel)
            .or_default()
            .push(coord_to_worker_id(&coord, dim_sizes));
    }
    Ok(groups.into_values().collect())
}

/// Cell partition of child `child`, hashed on `hashed_columns`.
///
/// Every hashed column must be mapped to a dimension by `index`.
pub fn get_cell_partition(
    dim_sizes: &[usize],
    index: &ReverseIndex,
    child: usize,
    hashed_columns: &[usize],
) -> Result<Vec<Vec<usize>>> {
    let mapped_dims = hashed_columns
        .iter()
        .map(|&col| {
            index.dim_of(child, col).ok_or_else(|| {
                Error::Invariant(format!(
                    "column {col} of join child {child} is not a hypercube dimension"
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    cell_partition(dim_sizes, &mapped_dims)
}
