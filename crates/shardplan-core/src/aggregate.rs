//! Aggregate expressions and their local/merge decomposition.
//!
//! Every supported aggregate is decomposable: a list of *local* aggregates run
//! on each worker, a matching list of *merge* aggregates run after the network
//! transfer, and an optional finalizer expression over the merge outputs
//! (written with `Expr::MergeSlot`).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::expr::{binary, cast, BinaryOp, Expr};
use crate::schema::{DataType, Scheme};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateExpr {
    CountAll,
    Count(Expr),
    Sum(Expr),
    Min(Expr),
    Max(Expr),
    Avg(Expr),
}

/// Aggregate applied to a local-aggregate output column during the merge phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Sum,
    Min,
    Max,
}

impl MergeKind {
    /// The merge aggregate reading column `pos` of the transferred data.
    pub fn over(self, pos: usize) -> AggregateExpr {
        let input = Expr::Column(pos);
        match self {
            MergeKind::Sum => AggregateExpr::Sum(input),
            MergeKind::Min => AggregateExpr::Min(input),
            MergeKind::Max => AggregateExpr::Max(input),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub locals: Vec<AggregateExpr>,
    /// One entry per local aggregate, same order.
    pub merges: Vec<MergeKind>,
    pub finalizer: Option<Expr>,
}

impl AggregateExpr {
    pub fn input(&self) -> Option<&Expr> {
        match self {
            AggregateExpr::CountAll => None,
            AggregateExpr::Count(e)
            | AggregateExpr::Sum(e)
            | AggregateExpr::Min(e)
            | AggregateExpr::Max(e)
            | AggregateExpr::Avg(e) => Some(e),
        }
    }

    pub fn input_mut(&mut self) -> Option<&mut Expr> {
        match self {
            AggregateExpr::CountAll => None,
            AggregateExpr::Count(e)
            | AggregateExpr::Sum(e)
            | AggregateExpr::Min(e)
            | AggregateExpr::Max(e)
            | AggregateExpr::Avg(e) => Some(e),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateExpr::CountAll | AggregateExpr::Count(_) => "COUNT",
            AggregateExpr::Sum(_) => "SUM",
            AggregateExpr::Min(_) => "MIN",
            AggregateExpr::Max(_) => "MAX",
            AggregateExpr::Avg(_) => "AVG",
        }
    }

    pub fn decompose(&self) -> Decomposition {
        let single = |local: AggregateExpr, merge: MergeKind| Decomposition {
            locals: vec![local],
            merges: vec![merge],
            finalizer: None,
        };
        match self {
            AggregateExpr::CountAll | AggregateExpr::Count(_) => {
                single(self.clone(), MergeKind::Sum)
            }
            AggregateExpr::Sum(_) => single(self.clone(), MergeKind::Sum),
            AggregateExpr::Min(_) => single(self.clone(), MergeKind::Min),
            AggregateExpr::Max(_) => single(self.clone(), MergeKind::Max),
            AggregateExpr::Avg(e) => Decomposition {
                locals: vec![AggregateExpr::Sum(e.clone()), AggregateExpr::Count(e.clone())],
                merges: vec![MergeKind::Sum, MergeKind::Sum],
                finalizer: Some(binary(
                    BinaryOp::Divide,
                    cast(Expr::MergeSlot(0), DataType::Float64),
                    Expr::MergeSlot(1),
                )),
            },
        }
    }

    /// Operator name understood by the workers' aggregate operators.
    pub fn wire_name(&self) -> Result<&'static str> {
        match self {
            AggregateExpr::CountAll | AggregateExpr::Count(_) => Ok("AGG_OP_COUNT"),
            AggregateExpr::Sum(_) => Ok("AGG_OP_SUM"),
            AggregateExpr::Min(_) => Ok("AGG_OP_MIN"),
            AggregateExpr::Max(_) => Ok("AGG_OP_MAX"),
            AggregateExpr::Avg(_) => Err(Error::unsupported(
                self.to_string(),
                "AVG must be decomposed before compilation",
            )),
        }
    }

    pub fn data_type(&self, scheme: &Scheme) -> Result<DataType> {
        match self {
            AggregateExpr::CountAll | AggregateExpr::Count(_) => Ok(DataType::Int64),
            AggregateExpr::Avg(_) => Ok(DataType::Float64),
            AggregateExpr::Sum(e) => Ok(match e.data_type(scheme, None)? {
                DataType::Int32 => DataType::Int64,
                DataType::Float32 => DataType::Float64,
                other => other,
            }),
            AggregateExpr::Min(e) | AggregateExpr::Max(e) => e.data_type(scheme, None),
        }
    }
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.input() {
            None => write!(f, "COUNT(*)"),
            Some(e) => write!(f, "{}({e})", self.name()),
        }
    }
}
