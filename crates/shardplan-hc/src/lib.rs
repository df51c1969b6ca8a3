#![forbid(unsafe_code)]
//! shardplan-hc: HyperCube shuffle math (math → code).
//!
//! Responsibilities:
//! - Map each join column of each child to its hypercube dimension.
//! - Estimate the per-worker workload of a dimension-size assignment.
//! - Search for a cheap assignment under a worker budget.
//! - Compute, per child, which workers receive each hashed voxel.
//!
//! **No plan knowledge** here. The planner crate turns its results into
//! HyperCube shuffle operators.

pub mod cost;
pub mod frontier;
pub mod partition;
pub mod verify;

pub use cost::{workload, ReverseIndex};
pub use frontier::{search_dim_sizes, Assignment};
pub use partition::{cell_partition, coord_to_worker_id, get_cell_partition};
