//! Fragments, control structures and the top-level query document.

use serde::{Deserialize, Serialize};

use shardplan_core::relation::RelationKey;

use super::operator::OperatorEncoding;

/// Operators of one fragment, innermost leaf first and fragment root last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentEncoding {
    pub operators: Vec<OperatorEncoding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlanEncoding {
    SubQuery {
        fragments: Vec<FragmentEncoding>,
    },
    Sequence {
        plans: Vec<PlanEncoding>,
    },
    /// Runs `body` again while the `condition` relation is non-empty.
    DoWhile {
        body: Vec<PlanEncoding>,
        condition: RelationKey,
    },
}

impl PlanEncoding {
    /// Fragments across every sub-plan.
    pub fn fragment_count(&self) -> usize {
        match self {
            PlanEncoding::SubQuery { fragments } => fragments.len(),
            PlanEncoding::Sequence { plans } | PlanEncoding::DoWhile { body: plans, .. } => {
                plans.iter().map(PlanEncoding::fragment_count).sum()
            }
        }
    }

    /// Operators across every fragment of every sub-plan, in document order.
    pub fn operators(&self) -> Vec<&OperatorEncoding> {
        match self {
            PlanEncoding::SubQuery { fragments } => fragments
                .iter()
                .flat_map(|f| f.operators.iter())
                .collect(),
            PlanEncoding::Sequence { plans } | PlanEncoding::DoWhile { body: plans, .. } => {
                plans.iter().flat_map(PlanEncoding::operators).collect()
            }
        }
    }
}

/// The document handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEncoding {
    /// Query text exactly as submitted.
    #[serde(rename = "rawDatalog")]
    pub raw_datalog: String,
    /// Rendering of the logical plan before optimization.
    #[serde(rename = "logicalRa")]
    pub logical_ra: String,
    pub plan: PlanEncoding,
}
