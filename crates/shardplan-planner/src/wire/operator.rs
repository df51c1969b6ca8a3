//! Physical operators as wire records.
//!
//! Compiling a node reads only its own fields and the ids of its children;
//! the id allocator is the single piece of shared state.

use serde::{Deserialize, Serialize};

use shardplan_core::aggregate::AggregateExpr;
use shardplan_core::algebra::{Exchange, ExchangeKind, Operator, PlanArena};
use shardplan_core::error::{Error, Result};
use shardplan_core::expr::Expr;
use shardplan_core::id::{NodeId, OpId};
use shardplan_core::relation::RelationKey;
use shardplan_core::schema::{SchemaEncoding, Scheme};

use super::expr::{compile_emitters, compile_expr, EmitEncoding, ExprEncoding};
use super::OpIdAllocator;
use crate::columns::left_before_right;
use crate::distribute::equijoin_columns;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorEncoding {
    #[serde(rename = "opName")]
    pub op_name: String,
    #[serde(rename = "opId")]
    pub op_id: OpId,
    #[serde(flatten)]
    pub body: OperatorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateEncoding {
    #[serde(rename = "rootExpressionOperator")]
    pub root: ExprEncoding,
}

/// How a shuffle producer hashes tuples to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PartitionFunction {
    SingleFieldHash { index: usize },
    MultiFieldHash { indexes: Vec<usize> },
}

impl PartitionFunction {
    pub fn on(columns: &[usize]) -> Self {
        match columns {
            [index] => PartitionFunction::SingleFieldHash { index: *index },
            _ => PartitionFunction::MultiFieldHash {
                indexes: columns.to_vec(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "opType")]
pub enum OperatorBody {
    TableScan {
        #[serde(rename = "relationKey")]
        relation_key: RelationKey,
        temporary: bool,
    },
    Filter {
        #[serde(rename = "argChild")]
        arg_child: OpId,
        #[serde(rename = "argPredicate")]
        arg_predicate: PredicateEncoding,
    },
    Apply {
        #[serde(rename = "argChild")]
        arg_child: OpId,
        #[serde(rename = "emitExpressions")]
        emit_expressions: Vec<EmitEncoding>,
    },
    StatefulApply {
        #[serde(rename = "argChild")]
        arg_child: OpId,
        #[serde(rename = "emitExpressions")]
        emit_expressions: Vec<EmitEncoding>,
        #[serde(rename = "initializerExpressions")]
        initializer_expressions: Vec<EmitEncoding>,
        #[serde(rename = "updaterExpressions")]
        updater_expressions: Vec<EmitEncoding>,
    },
    DupElim {
        #[serde(rename = "argChild")]
        arg_child: OpId,
    },
    SymmetricHashJoin {
        #[serde(rename = "argColumnNames")]
        arg_column_names: Vec<String>,
        #[serde(rename = "argChild1")]
        arg_child1: OpId,
        #[serde(rename = "argChild2")]
        arg_child2: OpId,
        #[serde(rename = "argColumns1")]
        arg_columns1: Vec<usize>,
        #[serde(rename = "argColumns2")]
        arg_columns2: Vec<usize>,
        #[serde(rename = "argSelect1")]
        arg_select1: Vec<usize>,
        #[serde(rename = "argSelect2")]
        arg_select2: Vec<usize>,
    },
    LeapFrogJoin {
        /// Per join dimension, the `[child, column]` pairs it equates.
        #[serde(rename = "joinFieldMapping")]
        join_field_mapping: Vec<Vec<[usize; 2]>>,
        #[serde(rename = "argColumnNames")]
        arg_column_names: Vec<String>,
        #[serde(rename = "outputFieldMapping")]
        output_field_mapping: Vec<[usize; 2]>,
        #[serde(rename = "argChildren")]
        arg_children: Vec<OpId>,
    },
    Aggregate {
        #[serde(rename = "argChild")]
        arg_child: OpId,
        #[serde(rename = "argAggFields")]
        arg_agg_fields: Vec<usize>,
        #[serde(rename = "argAggOperators")]
        arg_agg_operators: Vec<Vec<String>>,
    },
    SingleGroupByAggregate {
        #[serde(rename = "argChild")]
        arg_child: OpId,
        #[serde(rename = "argAggFields")]
        arg_agg_fields: Vec<usize>,
        #[serde(rename = "argAggOperators")]
        arg_agg_operators: Vec<Vec<String>>,
        #[serde(rename = "argGroupField")]
        arg_group_field: usize,
    },
    MultiGroupByAggregate {
        #[serde(rename = "argChild")]
        arg_child: OpId,
        #[serde(rename = "argAggFields")]
        arg_agg_fields: Vec<usize>,
        #[serde(rename = "argAggOperators")]
        arg_agg_operators: Vec<Vec<String>>,
        #[serde(rename = "argGroupFields")]
        arg_group_fields: Vec<usize>,
    },
    InMemoryOrderBy {
        #[serde(rename = "argChild")]
        arg_child: OpId,
        #[serde(rename = "argSortColumns")]
        arg_sort_columns: Vec<usize>,
        #[serde(rename = "argAscending")]
        arg_ascending: Vec<bool>,
    },
    DbInsert {
        #[serde(rename = "relationKey")]
        relation_key: RelationKey,
        #[serde(rename = "argOverwriteTable")]
        arg_overwrite_table: bool,
        #[serde(rename = "argTemporary")]
        arg_temporary: bool,
        #[serde(rename = "argChild")]
        arg_child: OpId,
    },
    Singleton,
    Empty {
        schema: SchemaEncoding,
    },
    UnionAll {
        #[serde(rename = "argChildren")]
        arg_children: Vec<OpId>,
    },
    Difference {
        #[serde(rename = "argChild1")]
        arg_child1: OpId,
        #[serde(rename = "argChild2")]
        arg_child2: OpId,
    },
    ShuffleProducer {
        #[serde(rename = "argChild")]
        arg_child: OpId,
        #[serde(rename = "argPf")]
        arg_pf: PartitionFunction,
    },
    ShuffleConsumer {
        #[serde(rename = "argOperatorId")]
        arg_operator_id: OpId,
    },
    CollectProducer {
        #[serde(rename = "argChild")]
        arg_child: OpId,
    },
    CollectConsumer {
        #[serde(rename = "argOperatorId")]
        arg_operator_id: OpId,
    },
    BroadcastProducer {
        #[serde(rename = "argChild")]
        arg_child: OpId,
    },
    BroadcastConsumer {
        #[serde(rename = "argOperatorId")]
        arg_operator_id: OpId,
    },
    HyperShuffleProducer {
        #[serde(rename = "hashedColumns")]
        hashed_columns: Vec<usize>,
        #[serde(rename = "mappedHCDimensions")]
        mapped_hc_dimensions: Vec<usize>,
        #[serde(rename = "hyperCubeDimensions")]
        hyper_cube_dimensions: Vec<usize>,
        #[serde(rename = "cellPartition")]
        cell_partition: Vec<Vec<usize>>,
        #[serde(rename = "argChild")]
        arg_child: OpId,
    },
    HyperShuffleConsumer {
        #[serde(rename = "argOperatorId")]
        arg_operator_id: OpId,
    },
}

/// Compile the node at `id`. Children get their ids before the node itself.
pub fn compile_operator(
    arena: &PlanArena,
    id: NodeId,
    ids: &mut OpIdAllocator,
) -> Result<OperatorEncoding> {
    let op = arena.get(id)?;
    let children: Vec<OpId> = op.children().into_iter().map(|c| ids.id(c)).collect();
    let body = compile_body(arena, id, op, &children)?;
    Ok(OperatorEncoding {
        op_name: arena.label(id)?,
        op_id: ids.id(id),
        body,
    })
}

fn first(children: &[OpId], kind: &str) -> Result<OpId> {
    children
        .first()
        .copied()
        .ok_or_else(|| Error::Invariant(format!("{kind} compiled without its input")))
}

fn second(children: &[OpId], kind: &str) -> Result<OpId> {
    children
        .get(1)
        .copied()
        .ok_or_else(|| Error::Invariant(format!("{kind} compiled without its right input")))
}

fn compile_body(
    arena: &PlanArena,
    id: NodeId,
    op: &Operator,
    children: &[OpId],
) -> Result<OperatorBody> {
    let kind = op.kind_name();
    Ok(match op {
        Operator::Scan { relation, .. } => OperatorBody::TableScan {
            relation_key: relation.clone(),
            temporary: false,
        },
        Operator::ScanTemp { name, .. } => OperatorBody::TableScan {
            relation_key: RelationKey::temp(name.clone()),
            temporary: true,
        },
        Operator::Singleton => OperatorBody::Singleton,
        Operator::Empty { scheme } => OperatorBody::Empty {
            schema: SchemaEncoding::from(scheme),
        },
        Operator::Select {
            input, condition, ..
        } => OperatorBody::Filter {
            arg_child: first(children, kind)?,
            arg_predicate: PredicateEncoding {
                root: compile_expr(condition, &arena.scheme(*input)?)?,
            },
        },
        Operator::Apply { input, emitters } => OperatorBody::Apply {
            arg_child: first(children, kind)?,
            emit_expressions: compile_emitters(
                emitters,
                &arena.scheme(id)?,
                &arena.scheme(*input)?,
            )?,
        },
        Operator::StatefulApply {
            input,
            emitters,
            inits,
            updaters,
        } => {
            let child = arena.scheme(*input)?;
            let state = arena.state_scheme(id)?;
            OperatorBody::StatefulApply {
                arg_child: first(children, kind)?,
                emit_expressions: compile_emitters(emitters, &arena.scheme(id)?, &child)?,
                initializer_expressions: compile_emitters(inits, &state, &child)?,
                updater_expressions: compile_emitters(updaters, &state, &child)?,
            }
        }
        Operator::Distinct { .. } => OperatorBody::DupElim {
            arg_child: first(children, kind)?,
        },
        Operator::Join {
            left,
            right,
            condition,
            output_columns,
        } => {
            let left_scheme = arena.scheme(*left)?;
            let left_len = left_scheme.len();
            let combined = left_scheme.concat(&arena.scheme(*right)?);
            let condition = condition.to_positional(&combined)?;
            let label = arena.label(id)?;
            let (arg_columns1, arg_columns2) =
                equijoin_columns(&condition, left_len).map_err(|e| match e {
                    Error::InvalidJoinCondition(msg) => {
                        Error::InvalidJoinCondition(format!("{msg} in {label}"))
                    }
                    other => other,
                })?;
            let cols = output_columns
                .clone()
                .unwrap_or_else(|| (0..combined.len()).collect());
            if !left_before_right(&cols, left_len) {
                return Err(Error::unsupported(
                    label,
                    "output columns interleave the left and right inputs",
                ));
            }
            let (arg_select1, arg_select2) = split_select(&cols, left_len);
            OperatorBody::SymmetricHashJoin {
                arg_column_names: arena.scheme(id)?.names(),
                arg_child1: first(children, kind)?,
                arg_child2: second(children, kind)?,
                arg_columns1,
                arg_columns2,
                arg_select1,
                arg_select2,
            }
        }
        Operator::CrossProduct { left, right } => OperatorBody::SymmetricHashJoin {
            arg_column_names: arena.scheme(id)?.names(),
            arg_child1: first(children, kind)?,
            arg_child2: second(children, kind)?,
            arg_columns1: vec![],
            arg_columns2: vec![],
            arg_select1: (0..arena.scheme(*left)?.len()).collect(),
            arg_select2: (0..arena.scheme(*right)?.len()).collect(),
        },
        Operator::NaryJoin {
            children: inputs,
            conditions,
            output_columns,
        } => {
            let mut owners = Vec::new();
            for (child, input) in inputs.iter().enumerate() {
                let width = arena.scheme(*input)?.len();
                owners.extend((0..width).map(|col| [child, col]));
            }
            let locate = |pos: usize| {
                owners.get(pos).copied().ok_or_else(|| {
                    Error::Invariant(format!("{kind} column ${pos} is out of range"))
                })
            };
            OperatorBody::LeapFrogJoin {
                join_field_mapping: conditions
                    .iter()
                    .map(|dim| dim.iter().map(|&p| locate(p)).collect::<Result<Vec<_>>>())
                    .collect::<Result<Vec<_>>>()?,
                arg_column_names: arena.scheme(id)?.names(),
                output_field_mapping: output_columns
                    .iter()
                    .map(|&p| locate(p))
                    .collect::<Result<Vec<_>>>()?,
                arg_children: children.to_vec(),
            }
        }
        Operator::GroupBy {
            input,
            grouping,
            aggregates,
            ..
        } => compile_group_by(
            &arena.scheme(*input)?,
            grouping,
            aggregates,
            first(children, kind)?,
        )?,
        Operator::OrderBy {
            sort_columns,
            ascending,
            ..
        } => OperatorBody::InMemoryOrderBy {
            arg_child: first(children, kind)?,
            arg_sort_columns: sort_columns.clone(),
            arg_ascending: ascending.clone(),
        },
        Operator::UnionAll { .. } => OperatorBody::UnionAll {
            arg_children: vec![first(children, kind)?, second(children, kind)?],
        },
        Operator::Difference { .. } => OperatorBody::Difference {
            arg_child1: first(children, kind)?,
            arg_child2: second(children, kind)?,
        },
        Operator::Producer { exchange, .. } => {
            let arg_child = first(children, kind)?;
            match exchange {
                Exchange::Shuffle { columns } => OperatorBody::ShuffleProducer {
                    arg_child,
                    arg_pf: PartitionFunction::on(columns),
                },
                Exchange::Collect => OperatorBody::CollectProducer { arg_child },
                Exchange::Broadcast => OperatorBody::BroadcastProducer { arg_child },
                Exchange::HyperCube(spec) => OperatorBody::HyperShuffleProducer {
                    hashed_columns: spec.hashed_columns.clone(),
                    mapped_hc_dimensions: spec.mapped_dims.clone(),
                    hyper_cube_dimensions: spec.dim_sizes.clone(),
                    cell_partition: spec.cell_partition.clone(),
                    arg_child,
                },
            }
        }
        Operator::Consumer { kind: exchange, .. } => {
            let arg_operator_id = first(children, kind)?;
            match exchange {
                ExchangeKind::Shuffle => OperatorBody::ShuffleConsumer { arg_operator_id },
                ExchangeKind::Collect => OperatorBody::CollectConsumer { arg_operator_id },
                ExchangeKind::Broadcast => OperatorBody::BroadcastConsumer { arg_operator_id },
                ExchangeKind::HyperCube => OperatorBody::HyperShuffleConsumer { arg_operator_id },
            }
        }
        Operator::Store { relation, .. } => OperatorBody::DbInsert {
            relation_key: relation.clone(),
            arg_overwrite_table: true,
            arg_temporary: false,
            arg_child: first(children, kind)?,
        },
        Operator::StoreTemp { name, .. } => OperatorBody::DbInsert {
            relation_key: RelationKey::temp(name.clone()),
            arg_overwrite_table: true,
            arg_temporary: true,
            arg_child: first(children, kind)?,
        },
        Operator::Project { .. } => {
            return Err(Error::unsupported(
                arena.label(id)?,
                "projections must be rewritten into applies before compilation",
            ))
        }
        Operator::Exchange { .. } => {
            return Err(Error::unsupported(
                arena.label(id)?,
                "logical exchanges must be split into producer and consumer",
            ))
        }
        Operator::Intersection { .. } => {
            return Err(Error::unsupported(
                arena.label(id)?,
                "the workers have no intersection operator",
            ))
        }
        Operator::Sequence { .. } | Operator::Parallel { .. } | Operator::DoWhile { .. } => {
            return Err(Error::unsupported(
                kind,
                "control structures are plans, not operators",
            ))
        }
    })
}

/// Split a left-before-right output list into per-side selections.
fn split_select(cols: &[usize], left_len: usize) -> (Vec<usize>, Vec<usize>) {
    let left = cols.iter().copied().filter(|&c| c < left_len).collect();
    let right = cols
        .iter()
        .filter(|&&c| c >= left_len)
        .map(|&c| c - left_len)
        .collect();
    (left, right)
}

fn field_position(e: &Expr, child: &Scheme, what: &str) -> Result<usize> {
    let pos = e
        .column_position(child)
        .ok_or_else(|| Error::unsupported("GroupBy", format!("{what} `{e}` is not a column")))?;
    child.try_field(pos)?;
    Ok(pos)
}

fn compile_group_by(
    child: &Scheme,
    grouping: &[Expr],
    aggregates: &[AggregateExpr],
    arg_child: OpId,
) -> Result<OperatorBody> {
    let groups = grouping
        .iter()
        .map(|g| field_position(g, child, "grouping term"))
        .collect::<Result<Vec<_>>>()?;
    let mut arg_agg_fields = Vec::with_capacity(aggregates.len());
    let mut arg_agg_operators = Vec::with_capacity(aggregates.len());
    for agg in aggregates {
        arg_agg_fields.push(match agg.input() {
            // COUNT(*) counts rows of any column.
            None => 0,
            Some(e) => field_position(e, child, "aggregate input")?,
        });
        arg_agg_operators.push(vec![agg.wire_name()?.to_string()]);
    }
    Ok(match groups.as_slice() {
        [] => OperatorBody::Aggregate {
            arg_child,
            arg_agg_fields,
            arg_agg_operators,
        },
        [g] => OperatorBody::SingleGroupByAggregate {
            arg_child,
            arg_agg_fields,
            arg_agg_operators,
            arg_group_field: *g,
        },
        _ => OperatorBody::MultiGroupByAggregate {
            arg_child,
            arg_agg_fields,
            arg_agg_operators,
            arg_group_fields: groups,
        },
    })
}
