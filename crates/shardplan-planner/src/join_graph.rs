//! Merging left-deep chains of binary equijoins into one multiway join.
//!
//! In a left-deep chain whose inner joins keep all of their columns, every
//! join condition is positional over a prefix of the concatenated leaf
//! schemes, so column positions are global across the whole chain. Equated
//! positions are grouped with union-find; each group is one join dimension.

use std::collections::BTreeMap;

use shardplan_core::algebra::{Operator, PlanArena};
use shardplan_core::error::Result;
use shardplan_core::id::NodeId;

use crate::rules::{Rule, RuleContext};

/// Disjoint sets over column positions.
#[derive(Debug, Default)]
pub struct UnionFind {
    parent: BTreeMap<usize, usize>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&mut self, x: usize) -> usize {
        let p = *self.parent.entry(x).or_insert(x);
        if p == x {
            return x;
        }
        let root = self.find(p);
        self.parent.insert(x, root);
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller root wins so groups are stable under input order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent.insert(hi, lo);
        }
    }

    /// All groups, each sorted, ordered by their smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let keys: Vec<usize> = self.parent.keys().copied().collect();
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for k in keys {
            let root = self.find(k);
            by_root.entry(root).or_default().push(k);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        for g in &mut groups {
            g.sort_unstable();
        }
        groups.sort_by_key(|g| g.first().copied());
        groups
    }
}

/// Leaves and equalities gathered from a join chain.
#[derive(Default)]
struct Chain {
    leaves: Vec<NodeId>,
    groups: UnionFind,
}

impl Chain {
    /// Walk the chain under `id`. Returns why the chain cannot be merged, if it cannot.
    fn collect(&mut self, arena: &PlanArena, id: NodeId, is_root: bool) -> Result<Option<&'static str>> {
        match arena.get(id)? {
            Operator::Join {
                left,
                right,
                condition,
                output_columns,
            } => {
                let width = arena.scheme(*left)?.len() + arena.scheme(*right)?.len();
                if !is_root && !is_identity(output_columns.as_deref(), width) {
                    return Ok(Some("inner join projects its output"));
                }
                if !is_leaf_like(arena, *right)? {
                    return Ok(Some("right input is not a storage leaf"));
                }
                let mut pairs = Vec::new();
                for c in condition.conjuncts() {
                    match c.column_equality() {
                        Some(pair) => pairs.push(pair),
                        None => return Ok(Some("condition is not a conjunction of column equalities")),
                    }
                }
                if let Some(reason) = self.collect_left(arena, *left)? {
                    return Ok(Some(reason));
                }
                self.leaves.push(*right);
                for (a, b) in pairs {
                    self.groups.union(a, b);
                }
                Ok(None)
            }
            _ => Ok(Some("not a join")),
        }
    }

    fn collect_left(&mut self, arena: &PlanArena, left: NodeId) -> Result<Option<&'static str>> {
        match arena.get(left)? {
            Operator::Join { .. } => self.collect(arena, left, false),
            // Merged earlier in the same bottom-up pass.
            Operator::NaryJoin {
                children,
                conditions,
                output_columns,
            } => {
                let mut width = 0;
                for c in children {
                    width += arena.scheme(*c)?.len();
                }
                if !is_identity(Some(output_columns), width) {
                    return Ok(Some("inner multiway join projects its output"));
                }
                self.leaves.extend(children.iter().copied());
                for group in conditions {
                    for pair in group.windows(2) {
                        self.groups.union(pair[0], pair[1]);
                    }
                }
                Ok(None)
            }
            _ if is_leaf_like(arena, left)? => {
                self.leaves.push(left);
                Ok(None)
            }
            _ => Ok(Some("left input is neither a join nor a storage leaf")),
        }
    }
}

fn is_identity(cols: Option<&[usize]>, width: usize) -> bool {
    match cols {
        None => true,
        Some(cols) => cols.len() == width && cols.iter().enumerate().all(|(i, &c)| i == c),
    }
}

/// A storage leaf, possibly under selections.
fn is_leaf_like(arena: &PlanArena, id: NodeId) -> Result<bool> {
    let mut cur = id;
    loop {
        match arena.get(cur)? {
            Operator::Select { input, .. } => cur = *input,
            op => return Ok(op.is_leaf()),
        }
    }
}

/// Replaces a chain of at least two binary joins by a `NaryJoin`. Chains that
/// do not qualify are left alone.
pub struct MergeToNaryJoin;

impl Rule for MergeToNaryJoin {
    fn name(&self) -> &'static str {
        "Join, Join => NaryJoin"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let (left, right, output_columns) = match arena.get(id)? {
            Operator::Join {
                left,
                right,
                output_columns,
                ..
            } => (*left, *right, output_columns.clone()),
            _ => return Ok(id),
        };
        if !matches!(
            arena.get(left)?,
            Operator::Join { .. } | Operator::NaryJoin { .. }
        ) {
            return Ok(id);
        }

        let mut chain = Chain::default();
        if let Some(_reason) = chain.collect(arena, id, true)? {
            #[cfg(feature = "tracing")]
            tracing::debug!(node = %id, reason = _reason, "join chain not merged");
            return Ok(id);
        }

        let width = arena.scheme(left)?.len() + arena.scheme(right)?.len();
        let conditions = chain.groups.groups();
        let output_columns = output_columns.unwrap_or_else(|| (0..width).collect());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            node = %id,
            children = chain.leaves.len(),
            dimensions = conditions.len(),
            "merged join chain"
        );

        arena.replace(
            id,
            Operator::NaryJoin {
                children: chain.leaves,
                conditions,
                output_columns,
            },
        )?;
        Ok(id)
    }
}
