//! Operator trees stored in an arena.
//!
//! Operators reference their children through `NodeId` handles. Rules rewrite
//! a tree by mutating operators in place or by allocating replacements and
//! swapping the handle held by the parent; a subtree is owned by exactly one
//! parent slot at a time. Nodes orphaned by a rewrite simply stay unreachable.
//!
//! Node identity (the handle), never structural equality, is what later
//! stages key op ids and fragment membership on.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::aggregate::AggregateExpr;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::id::NodeId;
use crate::relation::RelationKey;
use crate::schema::{Field, Scheme};

/// One output column of an `Apply`: optional name plus the expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    pub name: Option<String>,
    pub expr: Expr,
}

impl Emitter {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: Some(name.into()),
            expr,
        }
    }

    pub fn unnamed(expr: Expr) -> Self {
        Self { name: None, expr }
    }
}

impl std::fmt::Display for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(n) => write!(f, "{n}={}", self.expr),
            None => write!(f, "{}", self.expr),
        }
    }
}

/// Everything a child of a multiway join needs to route its tuples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperCubeSpec {
    /// Child columns that are hashed, ordered by the dimension they map to.
    pub hashed_columns: Vec<usize>,
    /// Hypercube dimension of each hashed column.
    pub mapped_dims: Vec<usize>,
    /// Partition count of every dimension of the full hypercube.
    pub dim_sizes: Vec<usize>,
    /// Worker ids receiving a tuple, indexed by the rank of its subcube voxel.
    pub cell_partition: Vec<Vec<usize>>,
}

/// How tuples cross the network at an exchange point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exchange {
    /// Hash-partition on the given columns.
    Shuffle { columns: Vec<usize> },
    /// Gather everything on a single worker.
    Collect,
    /// Replicate to every worker.
    Broadcast,
    HyperCube(HyperCubeSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    Shuffle,
    Collect,
    Broadcast,
    HyperCube,
}

impl Exchange {
    pub fn kind(&self) -> ExchangeKind {
        match self {
            Exchange::Shuffle { .. } => ExchangeKind::Shuffle,
            Exchange::Collect => ExchangeKind::Collect,
            Exchange::Broadcast => ExchangeKind::Broadcast,
            Exchange::HyperCube(_) => ExchangeKind::HyperCube,
        }
    }

    fn detail(&self) -> String {
        match self {
            Exchange::Shuffle { columns } => format!("(h({}))", join_positions(columns)),
            Exchange::HyperCube(spec) => format!("(h({}))", join_positions(&spec.hashed_columns)),
            Exchange::Collect | Exchange::Broadcast => String::new(),
        }
    }
}

impl ExchangeKind {
    pub fn logical_name(self) -> &'static str {
        match self {
            ExchangeKind::Shuffle => "Shuffle",
            ExchangeKind::Collect => "Collect",
            ExchangeKind::Broadcast => "Broadcast",
            ExchangeKind::HyperCube => "HyperCubeShuffle",
        }
    }

    pub fn producer_name(self) -> &'static str {
        match self {
            ExchangeKind::Shuffle => "ShuffleProducer",
            ExchangeKind::Collect => "CollectProducer",
            ExchangeKind::Broadcast => "BroadcastProducer",
            ExchangeKind::HyperCube => "HyperShuffleProducer",
        }
    }

    pub fn consumer_name(self) -> &'static str {
        match self {
            ExchangeKind::Shuffle => "ShuffleConsumer",
            ExchangeKind::Collect => "CollectConsumer",
            ExchangeKind::Broadcast => "BroadcastConsumer",
            ExchangeKind::HyperCube => "HyperShuffleConsumer",
        }
    }
}

/// Which half of a distributed aggregation a `GroupBy` computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggPhase {
    /// Not yet distributed.
    Logical,
    Local,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    Scan {
        relation: RelationKey,
        scheme: Scheme,
    },
    ScanTemp {
        name: String,
        scheme: Scheme,
    },
    Singleton,
    Empty {
        scheme: Scheme,
    },
    Select {
        input: NodeId,
        condition: Expr,
        /// Set once selection pushdown has placed this node; never pushed again.
        pushed: bool,
    },
    /// Logical projection; rewritten into an `Apply` before compilation.
    Project {
        input: NodeId,
        columns: Vec<Expr>,
    },
    Apply {
        input: NodeId,
        emitters: Vec<Emitter>,
    },
    StatefulApply {
        input: NodeId,
        emitters: Vec<Emitter>,
        inits: Vec<Emitter>,
        updaters: Vec<Emitter>,
    },
    /// Equijoin projecting `output_columns` of `left ++ right` (all when `None`).
    Join {
        left: NodeId,
        right: NodeId,
        condition: Expr,
        output_columns: Option<Vec<usize>>,
    },
    CrossProduct {
        left: NodeId,
        right: NodeId,
    },
    /// Multiway join. `conditions` holds one group of equated columns per join
    /// dimension, as positions in the concatenation of all child schemes.
    NaryJoin {
        children: Vec<NodeId>,
        conditions: Vec<Vec<usize>>,
        output_columns: Vec<usize>,
    },
    GroupBy {
        input: NodeId,
        grouping: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        phase: AggPhase,
    },
    Distinct {
        input: NodeId,
    },
    OrderBy {
        input: NodeId,
        sort_columns: Vec<usize>,
        ascending: Vec<bool>,
    },
    UnionAll {
        left: NodeId,
        right: NodeId,
    },
    Difference {
        left: NodeId,
        right: NodeId,
    },
    Intersection {
        left: NodeId,
        right: NodeId,
    },
    /// Logical network transfer, later split into a producer/consumer pair.
    Exchange {
        input: NodeId,
        exchange: Exchange,
    },
    Producer {
        input: NodeId,
        exchange: Exchange,
    },
    /// Leaf of a downstream fragment reading what `producer` sends.
    Consumer {
        producer: NodeId,
        kind: ExchangeKind,
    },
    Store {
        input: NodeId,
        relation: RelationKey,
    },
    StoreTemp {
        input: NodeId,
        name: String,
    },
    Sequence {
        children: Vec<NodeId>,
    },
    Parallel {
        children: Vec<NodeId>,
    },
    /// Body plans followed by the condition plan as the last child.
    DoWhile {
        children: Vec<NodeId>,
    },
}

impl Operator {
    pub fn kind_name(&self) -> &'static str {
        use Operator::*;
        match self {
            Scan { .. } => "Scan",
            ScanTemp { .. } => "ScanTemp",
            Singleton => "Singleton",
            Empty { .. } => "Empty",
            Select { .. } => "Select",
            Project { .. } => "Project",
            Apply { .. } => "Apply",
            StatefulApply { .. } => "StatefulApply",
            Join { .. } => "Join",
            CrossProduct { .. } => "CrossProduct",
            NaryJoin { .. } => "NaryJoin",
            GroupBy { .. } => "GroupBy",
            Distinct { .. } => "Distinct",
            OrderBy { .. } => "OrderBy",
            UnionAll { .. } => "UnionAll",
            Difference { .. } => "Difference",
            Intersection { .. } => "Intersection",
            Exchange { exchange, .. } => exchange.kind().logical_name(),
            Producer { exchange, .. } => exchange.kind().producer_name(),
            Consumer { kind, .. } => kind.consumer_name(),
            Store { .. } => "Store",
            StoreTemp { .. } => "StoreTemp",
            Sequence { .. } => "Sequence",
            Parallel { .. } => "Parallel",
            DoWhile { .. } => "DoWhile",
        }
    }

    pub fn children(&self) -> Vec<NodeId> {
        use Operator::*;
        match self {
            Scan { .. } | ScanTemp { .. } | Singleton | Empty { .. } => vec![],
            Select { input, .. }
            | Project { input, .. }
            | Apply { input, .. }
            | StatefulApply { input, .. }
            | GroupBy { input, .. }
            | Distinct { input }
            | OrderBy { input, .. }
            | Exchange { input, .. }
            | Producer { input, .. }
            | Store { input, .. }
            | StoreTemp { input, .. } => vec![*input],
            Consumer { producer, .. } => vec![*producer],
            Join { left, right, .. }
            | CrossProduct { left, right }
            | UnionAll { left, right }
            | Difference { left, right }
            | Intersection { left, right } => vec![*left, *right],
            NaryJoin { children, .. }
            | Sequence { children }
            | Parallel { children }
            | DoWhile { children } => children.clone(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut NodeId> {
        use Operator::*;
        match self {
            Scan { .. } | ScanTemp { .. } | Singleton | Empty { .. } => vec![],
            Select { input, .. }
            | Project { input, .. }
            | Apply { input, .. }
            | StatefulApply { input, .. }
            | GroupBy { input, .. }
            | Distinct { input }
            | OrderBy { input, .. }
            | Exchange { input, .. }
            | Producer { input, .. }
            | Store { input, .. }
            | StoreTemp { input, .. } => vec![input],
            Consumer { producer, .. } => vec![producer],
            Join { left, right, .. }
            | CrossProduct { left, right }
            | UnionAll { left, right }
            | Difference { left, right }
            | Intersection { left, right } => vec![left, right],
            NaryJoin { children, .. }
            | Sequence { children }
            | Parallel { children }
            | DoWhile { children } => children.iter_mut().collect(),
        }
    }

    /// Zero-input operators (storage or constant leaves).
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Operator::Scan { .. }
                | Operator::ScanTemp { .. }
                | Operator::Singleton
                | Operator::Empty { .. }
        )
    }

    /// Multi-statement control structures.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Operator::Sequence { .. } | Operator::Parallel { .. } | Operator::DoWhile { .. }
        )
    }

    /// Operators that end a fragment: every consumer (network boundary) and
    /// stored-relation scans (storage boundary).
    pub fn is_fragment_leaf(&self) -> bool {
        matches!(
            self,
            Operator::Consumer { .. } | Operator::Scan { .. } | Operator::ScanTemp { .. }
        )
    }

    pub fn is_exchange(&self, kind: ExchangeKind) -> bool {
        matches!(self, Operator::Exchange { exchange, .. } if exchange.kind() == kind)
    }
}

fn join_positions(cols: &[usize]) -> String {
    cols.iter()
        .map(|c| format!("${c}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Name given to an unnamed computed column at position `pos`.
pub fn default_column_name(pos: usize) -> String {
    format!("_COLUMN{pos}_")
}

#[derive(Debug, Clone, Default)]
pub struct PlanArena {
    nodes: Vec<Operator>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, op: Operator) -> NodeId {
        self.nodes.push(op);
        NodeId::new((self.nodes.len() - 1) as u64)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Result<&Operator> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| Error::Invariant(format!("dangling node handle {id}")))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Operator> {
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| Error::Invariant(format!("dangling node handle {id}")))
    }

    /// Overwrite the operator behind `id`, returning the previous one.
    pub fn replace(&mut self, id: NodeId, op: Operator) -> Result<Operator> {
        Ok(std::mem::replace(self.get_mut(id)?, op))
    }

    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.get(id)?.children())
    }

    /// Point child slot `slot` of `id` at `child`.
    pub fn set_child(&mut self, id: NodeId, slot: usize, child: NodeId) -> Result<()> {
        let op = self.get_mut(id)?;
        let kind = op.kind_name();
        let mut slots = op.children_mut();
        let target = slots
            .get_mut(slot)
            .ok_or_else(|| Error::Invariant(format!("{kind} has no child slot {slot}")))?;
        **target = child;
        Ok(())
    }

    /// Output scheme of the subtree rooted at `id`.
    pub fn scheme(&self, id: NodeId) -> Result<Scheme> {
        use Operator::*;
        match self.get(id)? {
            Scan { scheme, .. } | ScanTemp { scheme, .. } | Empty { scheme } => Ok(scheme.clone()),
            Singleton | Sequence { .. } | Parallel { .. } | DoWhile { .. } => Ok(Scheme::default()),
            Select { input, .. }
            | Distinct { input }
            | OrderBy { input, .. }
            | Exchange { input, .. }
            | Producer { input, .. }
            | Store { input, .. }
            | StoreTemp { input, .. } => self.scheme(*input),
            Consumer { producer, .. } => self.scheme(*producer),
            UnionAll { left, .. } | Difference { left, .. } | Intersection { left, .. } => {
                self.scheme(*left)
            }
            Project { input, columns } => {
                let child = self.scheme(*input)?;
                let positions = columns
                    .iter()
                    .map(|c| {
                        c.column_position(&child).ok_or_else(|| {
                            Error::Schema(format!("projection of non-column `{c}`"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                child.select(&positions)
            }
            Apply { input, emitters } => {
                let child = self.scheme(*input)?;
                emitter_scheme(emitters, &child, None)
            }
            StatefulApply {
                input, emitters, ..
            } => {
                let child = self.scheme(*input)?;
                let state = self.state_scheme(id)?;
                emitter_scheme(emitters, &child, Some(&state))
            }
            Join {
                left,
                right,
                output_columns,
                ..
            } => {
                let combined = self.scheme(*left)?.concat(&self.scheme(*right)?);
                match output_columns {
                    Some(cols) => combined.select(cols),
                    None => Ok(combined),
                }
            }
            CrossProduct { left, right } => Ok(self.scheme(*left)?.concat(&self.scheme(*right)?)),
            NaryJoin {
                children,
                output_columns,
                ..
            } => {
                let mut combined = Scheme::default();
                for c in children {
                    combined = combined.concat(&self.scheme(*c)?);
                }
                combined.select(output_columns)
            }
            GroupBy {
                input,
                grouping,
                aggregates,
                ..
            } => {
                let child = self.scheme(*input)?;
                let mut fields = Vec::with_capacity(grouping.len() + aggregates.len());
                for (i, g) in grouping.iter().enumerate() {
                    let name = match g.column_position(&child) {
                        Some(p) => child.try_field(p)?.name.clone(),
                        None => default_column_name(i),
                    };
                    fields.push(Field::new(name, g.data_type(&child, None)?));
                }
                for (j, agg) in aggregates.iter().enumerate() {
                    fields.push(Field::new(
                        default_column_name(grouping.len() + j),
                        agg.data_type(&child)?,
                    ));
                }
                Ok(Scheme::new(fields))
            }
        }
    }

    /// Scheme of the state tuple of a `StatefulApply`, derived from its initializers.
    pub fn state_scheme(&self, id: NodeId) -> Result<Scheme> {
        match self.get(id)? {
            Operator::StatefulApply { input, inits, .. } => {
                let child = self.scheme(*input)?;
                let fields = inits
                    .iter()
                    .enumerate()
                    .map(|(i, e)| {
                        let name = e.name.clone().unwrap_or_else(|| format!("_STATE{i}_"));
                        Ok(Field::new(name, e.expr.data_type(&child, None)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Scheme::new(fields))
            }
            other => Err(Error::Invariant(format!(
                "{} has no state scheme",
                other.kind_name()
            ))),
        }
    }

    /// Short human-readable description of one operator.
    pub fn label(&self, id: NodeId) -> Result<String> {
        use Operator::*;
        let op = self.get(id)?;
        let kind = op.kind_name();
        Ok(match op {
            Scan { relation, .. } => format!("{kind}({relation})"),
            ScanTemp { name, .. } | StoreTemp { name, .. } => format!("{kind}({name})"),
            Store { relation, .. } => format!("{kind}({relation})"),
            Select { condition, .. } => format!("{kind}({condition})"),
            Project { columns, .. } => format!("{kind}({})", join_display(columns)),
            Apply { emitters, .. } | StatefulApply { emitters, .. } => {
                format!("{kind}({})", join_display(emitters))
            }
            Join { condition, .. } => format!("{kind}({condition})"),
            NaryJoin { conditions, .. } => {
                let dims = conditions
                    .iter()
                    .map(|d| format!("[{}]", join_positions(d)))
                    .collect::<Vec<_>>();
                format!("{kind}({})", dims.join(", "))
            }
            GroupBy {
                grouping,
                aggregates,
                ..
            } => format!(
                "{kind}[{}; {}]",
                join_display(grouping),
                join_display(aggregates)
            ),
            OrderBy {
                sort_columns,
                ascending,
                ..
            } => {
                let keys = sort_columns
                    .iter()
                    .zip(ascending)
                    .map(|(c, asc)| format!("${c} {}", if *asc { "ASC" } else { "DESC" }))
                    .collect::<Vec<_>>();
                format!("{kind}({})", keys.join(", "))
            }
            Exchange { exchange, .. } | Producer { exchange, .. } => {
                format!("{kind}{}", exchange.detail())
            }
            Singleton
            | Empty { .. }
            | CrossProduct { .. }
            | Distinct { .. }
            | UnionAll { .. }
            | Difference { .. }
            | Intersection { .. }
            | Consumer { .. }
            | Sequence { .. }
            | Parallel { .. }
            | DoWhile { .. } => kind.to_string(),
        })
    }

    /// Indented multi-line rendering of the tree under `root`.
    pub fn render(&self, root: NodeId) -> Result<String> {
        let mut out = String::new();
        self.render_into(root, 0, &mut out)?;
        Ok(out)
    }

    fn render_into(&self, id: NodeId, depth: usize, out: &mut String) -> Result<()> {
        let op = self.get(id)?;
        let mut label = self.label(id)?;
        match op {
            Operator::Select { pushed: true, .. } => label.push_str(" [pushed]"),
            Operator::GroupBy { phase, .. } if *phase != AggPhase::Logical => {
                let _ = write!(label, " [{phase:?}]");
            }
            Operator::Join {
                output_columns: Some(cols),
                ..
            } => {
                let _ = write!(label, " -> [{}]", join_positions(cols));
            }
            Operator::NaryJoin { output_columns, .. } => {
                let _ = write!(label, " -> [{}]", join_positions(output_columns));
            }
            _ => {}
        }
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), label);
        for child in op.children() {
            self.render_into(child, depth + 1, out)?;
        }
        Ok(())
    }

    // Builders for the common logical shapes.

    pub fn scan(&mut self, relation: RelationKey, scheme: Scheme) -> NodeId {
        self.add(Operator::Scan { relation, scheme })
    }

    pub fn select(&mut self, input: NodeId, condition: Expr) -> NodeId {
        self.add(Operator::Select {
            input,
            condition,
            pushed: false,
        })
    }

    pub fn apply(&mut self, input: NodeId, emitters: Vec<Emitter>) -> NodeId {
        self.add(Operator::Apply { input, emitters })
    }

    pub fn join(&mut self, left: NodeId, right: NodeId, condition: Expr) -> NodeId {
        self.add(Operator::Join {
            left,
            right,
            condition,
            output_columns: None,
        })
    }

    pub fn group_by(
        &mut self,
        input: NodeId,
        grouping: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
    ) -> NodeId {
        self.add(Operator::GroupBy {
            input,
            grouping,
            aggregates,
            phase: AggPhase::Logical,
        })
    }

    pub fn exchange(&mut self, input: NodeId, exchange: Exchange) -> NodeId {
        self.add(Operator::Exchange { input, exchange })
    }

    pub fn store(&mut self, input: NodeId, relation: RelationKey) -> NodeId {
        self.add(Operator::Store { input, relation })
    }
}

fn emitter_scheme(emitters: &[Emitter], child: &Scheme, state: Option<&Scheme>) -> Result<Scheme> {
    let fields = emitters
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let name = match (&e.name, &e.expr) {
                (Some(n), _) => n.clone(),
                (None, Expr::Column(p)) => child.try_field(*p)?.name.clone(),
                (None, Expr::Named(n)) => n.clone(),
                (None, _) => default_column_name(i),
            };
            Ok(Field::new(name, e.expr.data_type(child, state)?))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Scheme::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, eq, lit_int, named, Literal};
    use crate::schema::DataType;

    fn two_col(name: &str, a: &str, b: &str) -> (RelationKey, Scheme) {
        (
            RelationKey::new("public", "adhoc", name),
            Scheme::new(vec![Field::new(a, DataType::Int64), Field::new(b, DataType::Int64)]),
        )
    }

    #[test]
    fn join_scheme_respects_output_columns() {
        let mut arena = PlanArena::new();
        let (ka, sa) = two_col("A", "a", "b");
        let (kb, sb) = two_col("B", "c", "d");
        let a = arena.scan(ka, sa);
        let b = arena.scan(kb, sb);
        let j = arena.join(a, b, eq(col(0), col(2)));
        assert_eq!(arena.scheme(j).unwrap().names(), vec!["a", "b", "c", "d"]);
        if let Operator::Join { output_columns, .. } = arena.get_mut(j).unwrap() {
            *output_columns = Some(vec![3, 0]);
        }
        assert_eq!(arena.scheme(j).unwrap().names(), vec!["d", "a"]);
    }

    #[test]
    fn group_by_scheme_names_and_types() {
        let mut arena = PlanArena::new();
        let (k, s) = two_col("A", "a", "b");
        let a = arena.scan(k, s);
        let g = arena.group_by(a, vec![named("b")], vec![AggregateExpr::CountAll]);
        let scheme = arena.scheme(g).unwrap();
        assert_eq!(scheme.names(), vec!["b", "_COLUMN1_"]);
        assert_eq!(scheme.fields[1].data_type, DataType::Int64);
    }

    #[test]
    fn apply_names_unnamed_columns() {
        let mut arena = PlanArena::new();
        let (k, s) = two_col("A", "a", "b");
        let a = arena.scan(k, s);
        let ap = arena.apply(
            a,
            vec![
                Emitter::unnamed(col(1)),
                Emitter::unnamed(Expr::Literal(Literal::Str("x".into()))),
                Emitter::new("z", lit_int(1)),
            ],
        );
        assert_eq!(arena.scheme(ap).unwrap().names(), vec!["b", "_COLUMN1_", "z"]);
    }

    #[test]
    fn fragment_leaves_are_consumers_and_scans() {
        let mut arena = PlanArena::new();
        let (k, s) = two_col("A", "a", "b");
        let a = arena.scan(k, s);
        let p = arena.add(Operator::Producer {
            input: a,
            exchange: Exchange::Collect,
        });
        let c = arena.add(Operator::Consumer {
            producer: p,
            kind: ExchangeKind::Collect,
        });
        assert!(arena.get(a).unwrap().is_fragment_leaf());
        assert!(arena.get(c).unwrap().is_fragment_leaf());
        assert!(!arena.get(p).unwrap().is_fragment_leaf());
        assert_eq!(arena.label(c).unwrap(), "CollectConsumer");
        assert_eq!(arena.scheme(c).unwrap().len(), 2);
    }

    #[test]
    fn dangling_handles_are_errors() {
        let arena = PlanArena::new();
        assert!(matches!(arena.get(NodeId::new(3)), Err(Error::Invariant(_))));
    }
}
