//! Provenance record emitted next to a compiled plan.
//!
//! Two compilations of the same input with the same config produce the same
//! `plan_hash`; the manifest id is unique per compilation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Algebra;
use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileManifest {
    pub id: ManifestId,

    /// Stable hash of the emitted wire document.
    pub plan_hash: Hash256,

    /// Compiler version string for provenance.
    pub compiler_version: String,

    pub algebra: Algebra,
    pub workers: usize,
    pub fragments: usize,
}

impl CompileManifest {
    pub fn new(plan_hash: Hash256, algebra: Algebra, workers: usize, fragments: usize) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            plan_hash,
            compiler_version: crate::VERSION.to_string(),
            algebra,
            workers,
            fragments,
        }
    }
}
