//! YAML → logical plan tree.
//!
//! Example:
//! ```yaml
//! query: "Q(x, z) :- A(x, y), B(y, z), x > 1"
//! plan:
//!   op: store
//!   relation: "Q"
//!   input:
//!     op: select
//!     condition: "x > 1"
//!     input:
//!       op: join
//!       condition: "$1 = $2"
//!       left:  { op: scan, relation: "A", schema: [ {name: x, type: long}, {name: y, type: long} ] }
//!       right: { op: scan, relation: "B", schema: [ {name: y, type: long}, {name: z, type: long} ] }
//! ```
//!
//! A document carries either one `plan` or a list of labelled `statements`.
//! Expressions may name attributes of the operator's input; they are
//! resolved to positions while the tree is built, so every node in the
//! resulting arena is positional. JSON documents parse as well.

use serde::{Deserialize, Serialize};

use shardplan_core::algebra::{Emitter, Operator, PlanArena};
use shardplan_core::error::{Error, Result};
use shardplan_core::expr::Expr;
use shardplan_core::id::NodeId;
use shardplan_core::relation::RelationKey;
use shardplan_core::schema::{Field, Scheme};

use super::expr::{parse_aggregate, parse_expr};
use super::parse_data_type;
use crate::pipeline::program_root;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    /// Source text of the query, copied into the emitted document.
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub plan: Option<NodeDef>,
    #[serde(default)]
    pub statements: Vec<StatementDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementDef {
    #[serde(default)]
    pub label: String,
    pub plan: NodeDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitDef {
    #[serde(default)]
    pub name: Option<String>,
    pub expr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeDef {
    Scan {
        relation: String,
        schema: Vec<FieldDef>,
    },
    ScanTemp {
        name: String,
        schema: Vec<FieldDef>,
    },
    Singleton,
    Empty {
        schema: Vec<FieldDef>,
    },
    Select {
        input: Box<NodeDef>,
        condition: String,
    },
    Project {
        input: Box<NodeDef>,
        columns: Vec<String>,
    },
    Apply {
        input: Box<NodeDef>,
        emit: Vec<EmitDef>,
    },
    StatefulApply {
        input: Box<NodeDef>,
        emit: Vec<EmitDef>,
        init: Vec<EmitDef>,
        update: Vec<EmitDef>,
    },
    Join {
        left: Box<NodeDef>,
        right: Box<NodeDef>,
        condition: String,
    },
    Cross {
        left: Box<NodeDef>,
        right: Box<NodeDef>,
    },
    GroupBy {
        input: Box<NodeDef>,
        #[serde(default)]
        grouping: Vec<String>,
        #[serde(default)]
        aggregates: Vec<String>,
    },
    Distinct {
        input: Box<NodeDef>,
    },
    OrderBy {
        input: Box<NodeDef>,
        columns: Vec<String>,
        /// Defaults to ascending on every column.
        #[serde(default)]
        ascending: Vec<bool>,
    },
    UnionAll {
        left: Box<NodeDef>,
        right: Box<NodeDef>,
    },
    Difference {
        left: Box<NodeDef>,
        right: Box<NodeDef>,
    },
    Intersection {
        left: Box<NodeDef>,
        right: Box<NodeDef>,
    },
    Store {
        input: Box<NodeDef>,
        relation: String,
    },
    StoreTemp {
        input: Box<NodeDef>,
        name: String,
    },
    Sequence {
        plans: Vec<NodeDef>,
    },
    Parallel {
        plans: Vec<NodeDef>,
    },
    /// Body plans first, loop condition last.
    DoWhile {
        plans: Vec<NodeDef>,
    },
}

/// A plan document built into an arena.
#[derive(Debug)]
pub struct ParsedPlan {
    pub query: String,
    pub arena: PlanArena,
    pub statements: Vec<(String, NodeId)>,
}

impl ParsedPlan {
    /// Root to optimize: the single unlabelled plan as is, otherwise the
    /// program root over every statement.
    pub fn root(&mut self) -> Result<NodeId> {
        match self.statements.as_slice() {
            [(label, root)] if label.is_empty() => Ok(*root),
            _ => program_root(&mut self.arena, &self.statements),
        }
    }
}

fn to_scheme(fields: &[FieldDef]) -> Result<Scheme> {
    fields
        .iter()
        .map(|f| Ok(Field::new(f.name.clone(), parse_data_type(&f.data_type)?)))
        .collect::<Result<Vec<_>>>()
        .map(Scheme::new)
}

fn positional(src: &str, scheme: &Scheme) -> Result<Expr> {
    parse_expr(src)?.to_positional(scheme)
}

fn emitters(defs: &[EmitDef], scheme: &Scheme) -> Result<Vec<Emitter>> {
    defs.iter()
        .map(|d| {
            Ok(Emitter {
                name: d.name.clone(),
                expr: positional(&d.expr, scheme)?,
            })
        })
        .collect()
}

fn column(src: &str, scheme: &Scheme) -> Result<usize> {
    let e = parse_expr(src)?;
    let pos = e
        .column_position(scheme)
        .ok_or_else(|| Error::Parse(format!("`{src}` is not a column of {scheme}")))?;
    scheme.try_field(pos)?;
    Ok(pos)
}

struct Builder {
    arena: PlanArena,
}

impl Builder {
    fn binary(&mut self, left: &NodeDef, right: &NodeDef) -> Result<(NodeId, NodeId)> {
        Ok((self.build(left)?, self.build(right)?))
    }

    fn all(&mut self, plans: &[NodeDef]) -> Result<Vec<NodeId>> {
        plans.iter().map(|p| self.build(p)).collect()
    }

    fn build(&mut self, node: &NodeDef) -> Result<NodeId> {
        let op = match node {
            NodeDef::Scan { relation, schema } => Operator::Scan {
                relation: relation.parse::<RelationKey>()?,
                scheme: to_scheme(schema)?,
            },
            NodeDef::ScanTemp { name, schema } => Operator::ScanTemp {
                name: name.clone(),
                scheme: to_scheme(schema)?,
            },
            NodeDef::Singleton => Operator::Singleton,
            NodeDef::Empty { schema } => Operator::Empty {
                scheme: to_scheme(schema)?,
            },
            NodeDef::Select { input, condition } => {
                let input = self.build(input)?;
                let condition = positional(condition, &self.arena.scheme(input)?)?;
                Operator::Select {
                    input,
                    condition,
                    pushed: false,
                }
            }
            NodeDef::Project { input, columns } => {
                let input = self.build(input)?;
                let child = self.arena.scheme(input)?;
                let columns = columns
                    .iter()
                    .map(|c| column(c, &child).map(Expr::Column))
                    .collect::<Result<Vec<_>>>()?;
                Operator::Project { input, columns }
            }
            NodeDef::Apply { input, emit } => {
                let input = self.build(input)?;
                let emitters = emitters(emit, &self.arena.scheme(input)?)?;
                Operator::Apply { input, emitters }
            }
            NodeDef::StatefulApply {
                input,
                emit,
                init,
                update,
            } => {
                let input = self.build(input)?;
                let child = self.arena.scheme(input)?;
                Operator::StatefulApply {
                    input,
                    emitters: emitters(emit, &child)?,
                    inits: emitters(init, &child)?,
                    updaters: emitters(update, &child)?,
                }
            }
            NodeDef::Join {
                left,
                right,
                condition,
            } => {
                let (left, right) = self.binary(left, right)?;
                let combined = self.arena.scheme(left)?.concat(&self.arena.scheme(right)?);
                Operator::Join {
                    left,
                    right,
                    condition: positional(condition, &combined)?,
                    output_columns: None,
                }
            }
            NodeDef::Cross { left, right } => {
                let (left, right) = self.binary(left, right)?;
                Operator::CrossProduct { left, right }
            }
            NodeDef::GroupBy {
                input,
                grouping,
                aggregates,
            } => {
                let input = self.build(input)?;
                let child = self.arena.scheme(input)?;
                let grouping = grouping
                    .iter()
                    .map(|g| positional(g, &child))
                    .collect::<Result<Vec<_>>>()?;
                let aggregates = aggregates
                    .iter()
                    .map(|a| {
                        let mut agg = parse_aggregate(a)?;
                        if let Some(e) = agg.input_mut() {
                            *e = e.to_positional(&child)?;
                        }
                        Ok(agg)
                    })
                    .collect::<Result<Vec<_>>>()?;
                return Ok(self.arena.group_by(input, grouping, aggregates));
            }
            NodeDef::Distinct { input } => Operator::Distinct {
                input: self.build(input)?,
            },
            NodeDef::OrderBy {
                input,
                columns,
                ascending,
            } => {
                let input = self.build(input)?;
                let child = self.arena.scheme(input)?;
                let sort_columns = columns
                    .iter()
                    .map(|c| column(c, &child))
                    .collect::<Result<Vec<_>>>()?;
                let ascending = match ascending.len() {
                    0 => vec![true; sort_columns.len()],
                    n if n == sort_columns.len() => ascending.clone(),
                    n => {
                        return Err(Error::Parse(format!(
                            "order_by has {} columns but {n} directions",
                            sort_columns.len()
                        )))
                    }
                };
                Operator::OrderBy {
                    input,
                    sort_columns,
                    ascending,
                }
            }
            NodeDef::UnionAll { left, right } => {
                let (left, right) = self.binary(left, right)?;
                Operator::UnionAll { left, right }
            }
            NodeDef::Difference { left, right } => {
                let (left, right) = self.binary(left, right)?;
                Operator::Difference { left, right }
            }
            NodeDef::Intersection { left, right } => {
                let (left, right) = self.binary(left, right)?;
                Operator::Intersection { left, right }
            }
            NodeDef::Store { input, relation } => Operator::Store {
                input: self.build(input)?,
                relation: relation.parse::<RelationKey>()?,
            },
            NodeDef::StoreTemp { input, name } => Operator::StoreTemp {
                input: self.build(input)?,
                name: name.clone(),
            },
            NodeDef::Sequence { plans } => Operator::Sequence {
                children: self.all(plans)?,
            },
            NodeDef::Parallel { plans } => Operator::Parallel {
                children: self.all(plans)?,
            },
            NodeDef::DoWhile { plans } => Operator::DoWhile {
                children: self.all(plans)?,
            },
        };
        Ok(self.arena.add(op))
    }
}

/// Parse a plan document and build its operators into a fresh arena.
pub fn parse_plan(src: &str) -> Result<ParsedPlan> {
    let doc: PlanDocument = serde_yaml::from_str(src)?;
    let mut builder = Builder {
        arena: PlanArena::new(),
    };
    let statements = match (doc.plan, doc.statements.is_empty()) {
        (Some(plan), true) => vec![(String::new(), builder.build(&plan)?)],
        (None, false) => doc
            .statements
            .iter()
            .map(|s| Ok((s.label.clone(), builder.build(&s.plan)?)))
            .collect::<Result<Vec<_>>>()?,
        (Some(_), false) => {
            return Err(Error::Parse(
                "document has both `plan` and `statements`".into(),
            ))
        }
        (None, true) => return Err(Error::Parse("document has no plan".into())),
    };
    Ok(ParsedPlan {
        query: doc.query,
        arena: builder.arena,
        statements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardplan_core::aggregate::AggregateExpr;
    use shardplan_core::expr::{binary, col, eq, lit_int, BinaryOp};
    use shardplan_core::schema::DataType;

    const JOIN: &str = r#"
query: "Q(x, z) :- A(x, y), B(y, z), x > 1"
plan:
  op: store
  relation: "Q"
  input:
    op: select
    condition: "x > 1"
    input:
      op: join
      condition: "$1 = $2"
      left:  { op: scan, relation: "A", schema: [ {name: x, type: long}, {name: y, type: long} ] }
      right: { op: scan, relation: "B", schema: [ {name: y, type: long}, {name: z, type: long} ] }
"#;

    #[test]
    fn test_parse_join_plan() {
        let mut parsed = parse_plan(JOIN).unwrap();
        assert_eq!(parsed.query, "Q(x, z) :- A(x, y), B(y, z), x > 1");
        let root = parsed.root().unwrap();
        assert_eq!(
            parsed.arena.render(root).unwrap(),
            "Store(public:adhoc:Q)\n  Select($0 > 1)\n    Join($1 = $2)\n      \
             Scan(public:adhoc:A)\n      Scan(public:adhoc:B)\n"
        );
        let Operator::Store { input, .. } = parsed.arena.get(root).unwrap() else {
            panic!("expected a store");
        };
        let Operator::Select { input, .. } = parsed.arena.get(*input).unwrap() else {
            panic!("expected a select");
        };
        let Operator::Join { condition, .. } = parsed.arena.get(*input).unwrap() else {
            panic!("expected a join");
        };
        assert_eq!(condition, &eq(col(1), col(2)));
    }

    #[test]
    fn test_names_resolve_against_input() {
        let src = r#"
plan:
  op: group_by
  grouping: ["k"]
  aggregates: ["SUM(v * 2)", "COUNT(*)"]
  input:
    op: apply
    emit:
      - { expr: "b" }
      - { name: v, expr: "a + 1" }
    input: { op: scan, relation: "R", schema: [ {name: a, type: int}, {name: b, type: string} ] }
"#;
        let err = parse_plan(src).unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "{err}");

        let fixed = src.replace("\"k\"", "\"b\"");
        let mut parsed = parse_plan(&fixed).unwrap();
        let root = parsed.root().unwrap();
        let Operator::GroupBy {
            grouping,
            aggregates,
            input,
            ..
        } = parsed.arena.get(root).unwrap().clone()
        else {
            panic!("expected a group by");
        };
        assert_eq!(grouping, vec![col(0)]);
        assert_eq!(
            aggregates,
            vec![
                AggregateExpr::Sum(binary(BinaryOp::Times, col(1), lit_int(2))),
                AggregateExpr::CountAll
            ]
        );
        let Operator::Apply { emitters, .. } = parsed.arena.get(input).unwrap() else {
            panic!("expected an apply");
        };
        assert_eq!(emitters[0], Emitter::unnamed(col(1)));
        let scheme = parsed.arena.scheme(input).unwrap();
        assert_eq!(scheme.names(), vec!["b", "v"]);
        assert_eq!(scheme.try_field(0).unwrap().data_type, DataType::Utf8);
    }

    #[test]
    fn test_statements_become_program() {
        let src = r#"
statements:
  - label: first
    plan: { op: scan, relation: "A", schema: [ {name: a, type: long} ] }
  - label: second
    plan: { op: scan, relation: "B", schema: [ {name: b, type: long} ] }
"#;
        let mut parsed = parse_plan(src).unwrap();
        let root = parsed.root().unwrap();
        assert_eq!(
            parsed.arena.render(root).unwrap(),
            "Parallel\n  StoreTemp(first)\n    Scan(public:adhoc:A)\n  \
             StoreTemp(second)\n    Scan(public:adhoc:B)\n"
        );
    }

    #[test]
    fn test_order_by_and_project() {
        let src = r#"
plan:
  op: order_by
  columns: ["z", "$0"]
  ascending: [false, true]
  input:
    op: project
    columns: ["z", "x"]
    input: { op: scan, relation: "A", schema: [ {name: x, type: long}, {name: z, type: double} ] }
"#;
        let mut parsed = parse_plan(src).unwrap();
        let root = parsed.root().unwrap();
        let Operator::OrderBy {
            sort_columns,
            ascending,
            input,
        } = parsed.arena.get(root).unwrap().clone()
        else {
            panic!("expected an order by");
        };
        assert_eq!(sort_columns, vec![0, 0]);
        assert_eq!(ascending, vec![false, true]);
        assert_eq!(
            parsed.arena.scheme(input).unwrap().names(),
            vec!["z", "x"]
        );
    }

    #[test]
    fn test_json_document() {
        let src = r#"{"plan": {"op": "distinct", "input": {"op": "singleton"}}}"#;
        let mut parsed = parse_plan(src).unwrap();
        let root = parsed.root().unwrap();
        assert_eq!(parsed.arena.render(root).unwrap(), "Distinct\n  Singleton\n");
    }

    #[test]
    fn test_rejects_malformed_documents() {
        assert!(matches!(parse_plan("query: q"), Err(Error::Parse(_))));
        assert!(matches!(parse_plan("plan: {op: teleport}"), Err(Error::Parse(_))));
        let both = r#"
plan: { op: singleton }
statements: [ { label: s, plan: { op: singleton } } ]
"#;
        assert!(matches!(parse_plan(both), Err(Error::Parse(_))));
        let bad_type = r#"plan: { op: scan, relation: R, schema: [ {name: a, type: blob} ] }"#;
        assert!(matches!(parse_plan(bad_type), Err(Error::Parse(_))));
        let bad_dirs = r#"
plan:
  op: order_by
  columns: ["a"]
  ascending: [true, false]
  input: { op: scan, relation: R, schema: [ {name: a, type: long} ] }
"#;
        assert!(matches!(parse_plan(bad_dirs), Err(Error::Parse(_))));
    }
}
