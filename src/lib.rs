#![forbid(unsafe_code)]
//! shardplan: compile logical relational plans into fragment-partitioned
//! physical plans for a shared-nothing cluster.
//!
//! This crate only re-exports the workspace members:
//! - `shardplan_core` (through [`prelude`]): ids, schemes, expressions, the
//!   operator arena, errors, config
//! - [`hc`]: hypercube workload model, dimension search, cell partitions
//! - [`planner`]: rule pipeline, wire compiler, fragment extractor, plan DSL

pub use shardplan_hc as hc;
pub use shardplan_planner as planner;

pub use shardplan_core::prelude;
pub use shardplan_planner::{compile_plan, compile_program, compile_query, optimize, parse_plan};
