#![forbid(unsafe_code)]
//! shardplan-planner: logical plan → physical, network-aware plan → wire
//! document for the coordinator.
//!
//! Design:
//! - Operators live in `shardplan-core::algebra::PlanArena`; every rule
//!   rewrites the arena in place and hands back the (possibly new) node id.
//! - `pipeline` fixes the order of rule groups: pushdown, join merging,
//!   column pruning, exchange placement, distributed aggregation, hypercube
//!   shuffles, and finally splitting exchanges into producer/consumer pairs.
//! - `fragment` cuts the physical tree at consumers and stored scans;
//!   `wire` turns each operator into its kind-tagged record.
//! - `dsl` reads YAML/JSON plan documents for the CLI and tests.

pub mod boundary;
pub mod catalog;
pub mod columns;
pub mod distribute;
pub mod dsl;
pub mod fragment;
pub mod groupby;
pub mod hypercube;
pub mod join_graph;
pub mod pipeline;
pub mod pushdown;
pub mod rules;
pub mod wire;

pub use catalog::{Catalog, FakeCatalog};
pub use dsl::yaml::{parse_plan, ParsedPlan};
pub use fragment::{compile_plan, extract_fragments, PlanCompiler};
pub use pipeline::{compile_program, compile_query, optimize, program_root, rule_groups};
pub use rules::{Rule, RuleContext, RuleGroup};
pub use wire::{FragmentEncoding, OperatorEncoding, PlanEncoding, QueryEncoding};
