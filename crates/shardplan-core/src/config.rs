//! Compiler configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Physical algebra targeted by the rule pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algebra {
    /// Binary hash joins over one-dimensional shuffles.
    LeftDeep,
    /// Multiway joins fed by hypercube shuffles.
    HyperCube,
}

impl FromStr for Algebra {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left-deep" | "leftdeep" => Ok(Algebra::LeftDeep),
            "hyper-cube" | "hypercube" => Ok(Algebra::HyperCube),
            other => Err(Error::Config(format!("unknown algebra `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    pub algebra: Algebra,

    /// Cap on assignments visited by the hypercube dimension search.
    pub max_hypercube_states: usize,

    /// Cardinality assumed for join children that are not plain scans.
    pub default_cardinality: u64,

    /// PushApply/RemoveUnusedColumns rounds before the final PushApply.
    pub push_apply_rounds: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            algebra: Algebra::LeftDeep,
            max_hypercube_states: 1_000_000,
            default_cardinality: 10,
            push_apply_rounds: 2,
        }
    }
}

impl CompilerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SHARDPLAN_ALGEBRA`: `left-deep` or `hyper-cube`
    /// - `SHARDPLAN_MAX_HC_STATES`: hypercube search cap
    /// - `SHARDPLAN_DEFAULT_CARDINALITY`: estimate for non-scan join children
    /// - `SHARDPLAN_PUSH_APPLY_ROUNDS`: apply pushdown rounds
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("SHARDPLAN_ALGEBRA") {
            if let Ok(v) = s.parse::<Algebra>() {
                cfg.algebra = v;
            }
        }

        if let Ok(s) = std::env::var("SHARDPLAN_MAX_HC_STATES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_hypercube_states = v;
            }
        }

        if let Ok(s) = std::env::var("SHARDPLAN_DEFAULT_CARDINALITY") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.default_cardinality = v;
            }
        }

        if let Ok(s) = std::env::var("SHARDPLAN_PUSH_APPLY_ROUNDS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.push_apply_rounds = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_hypercube_states == 0 {
            return Err(Error::Config(
                "max_hypercube_states must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CompilerConfig::default();
        assert_eq!(cfg.algebra, Algebra::LeftDeep);
        assert_eq!(cfg.default_cardinality, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_algebra_parsing() {
        assert_eq!("hyper-cube".parse::<Algebra>().unwrap(), Algebra::HyperCube);
        assert_eq!("LeftDeep".parse::<Algebra>().unwrap(), Algebra::LeftDeep);
        assert!("bushy".parse::<Algebra>().is_err());
    }

    #[test]
    fn test_zero_state_cap_rejected() {
        let cfg = CompilerConfig {
            max_hypercube_states: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
