#![forbid(unsafe_code)]
//! shardplan-core: the vocabulary shared by every compiler stage.
//!
//! - strongly typed ids (`OpId`, `NodeId`)
//! - schemes, relation keys, scalar expressions and decomposable aggregates
//! - the operator arena (`PlanArena`) that rules rewrite in place
//! - errors, compiler configuration, and stable hashing of emitted documents
//!
//! No rule logic lives here; see `shardplan-planner`.

pub mod aggregate;
pub mod algebra;
pub mod config;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod prelude;
pub mod relation;
pub mod schema;

/// Crate version, recorded in compile manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
