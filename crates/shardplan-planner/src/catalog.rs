//! What the planner needs to know about the cluster and the stored data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use shardplan_core::error::{Error, Result};
use shardplan_core::relation::RelationKey;

pub trait Catalog {
    /// Estimated tuple count of a stored relation.
    fn estimate_cardinality(&self, key: &RelationKey) -> u64;

    /// Number of worker processes available to run fragments.
    fn worker_count(&self) -> usize;
}

fn default_unknown() -> u64 {
    10
}

/// In-memory catalog, loadable from YAML:
///
/// ```yaml
/// workers: 8
/// default_cardinality: 100
/// relations:
///   public:adhoc:R: 1000
///   S: 40
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeCatalog {
    pub workers: usize,
    /// Returned for relations missing from `relations`.
    #[serde(default = "default_unknown")]
    pub default_cardinality: u64,
    /// Keyed by the `user:program:relation` form of the key.
    #[serde(default)]
    pub relations: BTreeMap<String, u64>,
}

impl FakeCatalog {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            default_cardinality: default_unknown(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_relation(mut self, key: &RelationKey, tuples: u64) -> Self {
        self.relations.insert(key.to_string(), tuples);
        self
    }

    /// Parse a YAML catalog, expanding short relation names to full keys.
    pub fn from_yaml(src: &str) -> Result<Self> {
        let mut cat: FakeCatalog = serde_yaml::from_str(src)?;
        if cat.workers == 0 {
            return Err(Error::Config("catalog must report at least one worker".into()));
        }
        let mut normalized = BTreeMap::new();
        for (name, tuples) in std::mem::take(&mut cat.relations) {
            let key: RelationKey = name.parse()?;
            normalized.insert(key.to_string(), tuples);
        }
        cat.relations = normalized;
        Ok(cat)
    }
}

impl Catalog for FakeCatalog {
    fn estimate_cardinality(&self, key: &RelationKey) -> u64 {
        self.relations
            .get(&key.to_string())
            .copied()
            .unwrap_or(self.default_cardinality)
    }

    fn worker_count(&self) -> usize {
        self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_short_names_expand() {
        let cat = FakeCatalog::from_yaml(
            "workers: 4\ndefault_cardinality: 7\nrelations:\n  R: 100\n  jwang:prog:S: 5\n",
        )
        .unwrap();
        assert_eq!(cat.worker_count(), 4);
        assert_eq!(cat.estimate_cardinality(&"R".parse().unwrap()), 100);
        assert_eq!(
            cat.estimate_cardinality(&RelationKey::new("jwang", "prog", "S")),
            5
        );
        assert_eq!(cat.estimate_cardinality(&"T".parse().unwrap()), 7);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            FakeCatalog::from_yaml("workers: 0\n"),
            Err(Error::Config(_))
        ));
    }
}
