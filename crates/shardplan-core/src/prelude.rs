//! Convenient re-exports for downstream crates.

pub use crate::aggregate::{AggregateExpr, Decomposition, MergeKind};
pub use crate::algebra::{
    AggPhase, Emitter, Exchange, ExchangeKind, HyperCubeSpec, Operator, PlanArena,
};
pub use crate::config::{Algebra, CompilerConfig};
pub use crate::error::{Error, Result};
pub use crate::expr::{BinaryOp, Expr, Literal, UnaryOp};
pub use crate::hash::{hash_serde, Hash256};
pub use crate::id::{NodeId, OpId};
pub use crate::manifest::{CompileManifest, ManifestId};
pub use crate::relation::RelationKey;
pub use crate::schema::{DataType, Field, Scheme, SchemaEncoding};
