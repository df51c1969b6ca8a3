//! Projection pushdown and column pruning.
//!
//! After `JoinToProjectingJoin` every join carries an explicit output column
//! list over `left ++ right`. The symmetric hash join selects its left and
//! right columns separately, so an output list must keep all left positions
//! before all right positions; rules that cannot preserve that leave the
//! projection in an `Apply` above the join.

use std::collections::{BTreeMap, BTreeSet};

use shardplan_core::algebra::{Emitter, Operator, PlanArena};
use shardplan_core::error::{Error, Result};
use shardplan_core::expr::{col, Expr};
use shardplan_core::id::NodeId;

use crate::rules::{Rule, RuleContext};

/// Does `cols` place every left position (`< left_len`) before every right one?
pub(crate) fn left_before_right(cols: &[usize], left_len: usize) -> bool {
    let first_right = cols.iter().position(|&c| c >= left_len).unwrap_or(cols.len());
    cols[first_right..].iter().all(|&c| c >= left_len)
}

/// Left input width and the effective output column list of a join.
fn join_output(
    arena: &PlanArena,
    left: NodeId,
    right: NodeId,
    cols: &Option<Vec<usize>>,
) -> Result<(usize, Vec<usize>)> {
    let left_len = arena.scheme(left)?.len();
    let width = left_len + arena.scheme(right)?.len();
    Ok((left_len, cols.clone().unwrap_or_else(|| (0..width).collect())))
}

/// Gives every join an explicit output column list and a positional condition.
pub struct JoinToProjectingJoin;

impl Rule for JoinToProjectingJoin {
    fn name(&self) -> &'static str {
        "Join => ProjectingJoin"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::Join {
            left,
            right,
            condition,
            output_columns,
        } = arena.get(id)?.clone()
        else {
            return Ok(id);
        };
        let combined = arena.scheme(left)?.concat(&arena.scheme(right)?);
        let condition = condition.to_positional(&combined)?;
        let output_columns = Some(output_columns.unwrap_or_else(|| (0..combined.len()).collect()));
        arena.replace(
            id,
            Operator::Join {
                left,
                right,
                condition,
                output_columns,
            },
        )?;
        Ok(id)
    }
}

/// `Project` over a join folds into the join's output columns.
pub struct ProjectIntoJoin;

impl Rule for ProjectIntoJoin {
    fn name(&self) -> &'static str {
        "Project, ProjectingJoin => ProjectingJoin"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::Project { input, columns } = arena.get(id)?.clone() else {
            return Ok(id);
        };
        let Operator::Join {
            left,
            right,
            condition,
            output_columns,
        } = arena.get(input)?.clone()
        else {
            return Ok(id);
        };

        let scheme = arena.scheme(input)?;
        let (left_len, cols) = join_output(arena, left, right, &output_columns)?;
        let mut composed = Vec::with_capacity(columns.len());
        for c in &columns {
            let pos = c
                .column_position(&scheme)
                .ok_or_else(|| Error::Schema(format!("projection of non-column `{c}`")))?;
            let target = cols.get(pos).ok_or_else(|| {
                Error::Schema(format!("projected column ${pos} outside join output"))
            })?;
            composed.push(*target);
        }
        if !left_before_right(&composed, left_len) {
            return Ok(id);
        }

        arena.replace(
            id,
            Operator::Join {
                left,
                right,
                condition,
                output_columns: Some(composed),
            },
        )?;
        Ok(id)
    }
}

/// Remaining projections become column-selecting applies.
pub struct ProjectToApply;

impl Rule for ProjectToApply {
    fn name(&self) -> &'static str {
        "Project => Apply"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::Project { input, columns } = arena.get(id)?.clone() else {
            return Ok(id);
        };
        let scheme = arena.scheme(input)?;
        let emitters = columns
            .iter()
            .map(|c| Ok(Emitter::unnamed(c.to_positional(&scheme)?)))
            .collect::<Result<Vec<_>>>()?;
        arena.replace(id, Operator::Apply { input, emitters })?;
        Ok(id)
    }
}

/// Merges stacked applies and moves column selection into joins.
pub struct PushApply;

impl Rule for PushApply {
    fn name(&self) -> &'static str {
        "Apply, Apply => Apply; Apply, ProjectingJoin => ProjectingJoin"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        // Every merge removes one Apply from below, so the loop is bounded by
        // the length of the Apply chain.
        loop {
            let Operator::Apply { input, emitters } = arena.get(id)?.clone() else {
                return Ok(id);
            };
            match arena.get(input)?.clone() {
                Operator::Apply {
                    input: inner_input,
                    emitters: inner,
                } => merge_applies(arena, id, inner_input, &emitters, &inner)?,
                Operator::Join {
                    left,
                    right,
                    condition,
                    output_columns,
                } => {
                    let (left_len, cols) = join_output(arena, left, right, &output_columns)?;
                    if let Some(folded) = fold_into_join(arena, input, &emitters, &cols, left_len)? {
                        arena.replace(
                            input,
                            Operator::Join {
                                left,
                                right,
                                condition,
                                output_columns: Some(folded),
                            },
                        )?;
                        return Ok(input);
                    }
                    prune_join_output(arena, id, input, emitters, &cols)?;
                    return Ok(id);
                }
                _ => return Ok(id),
            }
        }
    }
}

/// Substitute the inner emitters into the outer ones. An unnamed outer
/// emitter keeps its old name when the substitution would change it.
fn merge_applies(
    arena: &mut PlanArena,
    id: NodeId,
    inner_input: NodeId,
    outer: &[Emitter],
    inner: &[Emitter],
) -> Result<()> {
    let old_names = arena.scheme(id)?.names();
    let lookup = |i: usize| -> Result<Expr> {
        inner
            .get(i)
            .map(|e| e.expr.clone())
            .ok_or_else(|| Error::Invariant(format!("apply reads missing column ${i}")))
    };
    let merged = outer
        .iter()
        .map(|e| {
            Ok(Emitter {
                name: e.name.clone(),
                expr: e.expr.substitute(&lookup)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    arena.replace(
        id,
        Operator::Apply {
            input: inner_input,
            emitters: merged,
        },
    )?;

    let new_names = arena.scheme(id)?.names();
    if let Operator::Apply { emitters, .. } = arena.get_mut(id)? {
        for ((e, old), new) in emitters.iter_mut().zip(old_names).zip(new_names) {
            if e.name.is_none() && old != new {
                e.name = Some(old);
            }
        }
    }
    Ok(())
}

/// Composed join output when every emitter is a plain, unrenamed column
/// reference and the result keeps left columns before right columns.
fn fold_into_join(
    arena: &PlanArena,
    join: NodeId,
    emitters: &[Emitter],
    cols: &[usize],
    left_len: usize,
) -> Result<Option<Vec<usize>>> {
    let scheme = arena.scheme(join)?;
    let mut folded = Vec::with_capacity(emitters.len());
    for e in emitters {
        let Expr::Column(p) = e.expr else {
            return Ok(None);
        };
        if let Some(name) = &e.name {
            if scheme.field(p).map(|f| &f.name) != Some(name) {
                return Ok(None);
            }
        }
        let Some(&target) = cols.get(p) else {
            return Ok(None);
        };
        folded.push(target);
    }
    Ok(left_before_right(&folded, left_len).then_some(folded))
}

/// Narrow the join output to the columns the apply reads.
fn prune_join_output(
    arena: &mut PlanArena,
    id: NodeId,
    join: NodeId,
    mut emitters: Vec<Emitter>,
    cols: &[usize],
) -> Result<()> {
    let mut accessed: BTreeSet<usize> = emitters
        .iter()
        .flat_map(|e| e.expr.accessed_columns())
        .collect();
    if accessed.is_empty() {
        accessed.insert(0);
    }
    if accessed.len() >= cols.len() {
        return Ok(());
    }

    let mut kept = Vec::with_capacity(accessed.len());
    let mut map = BTreeMap::new();
    for (new_pos, &old_pos) in accessed.iter().enumerate() {
        let target = cols.get(old_pos).ok_or_else(|| {
            Error::Invariant(format!("apply reads column ${old_pos} beyond join output"))
        })?;
        kept.push(*target);
        map.insert(old_pos, new_pos);
    }
    for e in &mut emitters {
        e.expr.reindex(&map)?;
    }

    if let Operator::Join { output_columns, .. } = arena.get_mut(join)? {
        *output_columns = Some(kept);
    }
    let input = join;
    arena.replace(id, Operator::Apply { input, emitters })?;
    Ok(())
}

/// Inserts column-selecting applies below group-bys and joins that read
/// fewer columns than their inputs provide.
pub struct RemoveUnusedColumns;

impl Rule for RemoveUnusedColumns {
    fn name(&self) -> &'static str {
        "Remove unused columns"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        match arena.get(id)?.clone() {
            Operator::GroupBy {
                input,
                mut grouping,
                mut aggregates,
                phase,
            } => {
                let width = arena.scheme(input)?.len();
                if width == 0 {
                    return Ok(id);
                }
                let mut accessed: BTreeSet<usize> =
                    grouping.iter().flat_map(|g| g.accessed_columns()).collect();
                for agg in &aggregates {
                    if let Some(e) = agg.input() {
                        accessed.extend(e.accessed_columns());
                    }
                }
                if accessed.is_empty() {
                    accessed.insert(0);
                }
                if accessed.len() >= width {
                    return Ok(id);
                }

                let (narrow, map) = select_columns(arena, input, &accessed);
                for g in &mut grouping {
                    g.reindex(&map)?;
                }
                for agg in &mut aggregates {
                    if let Some(e) = agg.input_mut() {
                        e.reindex(&map)?;
                    }
                }
                arena.replace(
                    id,
                    Operator::GroupBy {
                        input: narrow,
                        grouping,
                        aggregates,
                        phase,
                    },
                )?;
                Ok(id)
            }
            Operator::Join {
                left,
                right,
                mut condition,
                output_columns: Some(mut cols),
            } => {
                let left_len = arena.scheme(left)?.len();
                let right_len = arena.scheme(right)?.len();
                let mut accessed = condition.accessed_columns();
                accessed.extend(cols.iter().copied());

                let mut left_used: BTreeSet<usize> =
                    accessed.iter().copied().filter(|&c| c < left_len).collect();
                let mut right_used: BTreeSet<usize> = accessed
                    .iter()
                    .filter(|&&c| c >= left_len)
                    .map(|&c| c - left_len)
                    .collect();
                if left_used.is_empty() {
                    left_used.insert(0);
                }
                if right_used.is_empty() {
                    right_used.insert(0);
                }
                let prune_left = left_used.len() < left_len;
                let prune_right = right_used.len() < right_len;
                if !prune_left && !prune_right {
                    return Ok(id);
                }

                let mut map = BTreeMap::new();
                let (new_left, new_left_len) = if prune_left {
                    let (narrow, left_map) = select_columns(arena, left, &left_used);
                    map.extend(left_map);
                    (narrow, left_used.len())
                } else {
                    map.extend((0..left_len).map(|c| (c, c)));
                    (left, left_len)
                };
                let new_right = if prune_right {
                    let (narrow, right_map) = select_columns(arena, right, &right_used);
                    map.extend(
                        right_map
                            .into_iter()
                            .map(|(old, new)| (old + left_len, new + new_left_len)),
                    );
                    narrow
                } else {
                    map.extend((0..right_len).map(|c| (c + left_len, c + new_left_len)));
                    right
                };

                condition.reindex(&map)?;
                for c in &mut cols {
                    *c = *map.get(c).ok_or_else(|| {
                        Error::Invariant(format!("join output column ${c} lost while pruning"))
                    })?;
                }
                arena.replace(
                    id,
                    Operator::Join {
                        left: new_left,
                        right: new_right,
                        condition,
                        output_columns: Some(cols),
                    },
                )?;
                Ok(id)
            }
            _ => Ok(id),
        }
    }
}

/// Apply over `input` keeping `columns` in order, plus the old-to-new position map.
fn select_columns(
    arena: &mut PlanArena,
    input: NodeId,
    columns: &BTreeSet<usize>,
) -> (NodeId, BTreeMap<usize, usize>) {
    let emitters = columns.iter().map(|&c| Emitter::unnamed(col(c))).collect();
    let map = columns.iter().enumerate().map(|(new, &old)| (old, new)).collect();
    (arena.apply(input, emitters), map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FakeCatalog;
    use crate::rules::RuleGroup;
    use shardplan_core::aggregate::AggregateExpr;
    use shardplan_core::config::CompilerConfig;
    use shardplan_core::expr::{binary, eq, named, BinaryOp};
    use shardplan_core::relation::RelationKey;
    use shardplan_core::schema::{DataType, Field, Scheme};

    fn scan(arena: &mut PlanArena, name: &str, cols: &[&str]) -> NodeId {
        let scheme = Scheme::new(cols.iter().map(|c| Field::new(*c, DataType::Int64)).collect());
        arena.scan(RelationKey::new("public", "adhoc", name), scheme)
    }

    fn run(arena: &mut PlanArena, root: NodeId, rules: Vec<Box<dyn Rule>>) -> NodeId {
        let catalog = FakeCatalog::new(2);
        let config = CompilerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        RuleGroup::new("test", rules).apply(arena, root, &ctx).unwrap()
    }

    #[test]
    fn test_left_before_right() {
        assert!(left_before_right(&[0, 1, 3, 2], 2));
        assert!(left_before_right(&[3], 2));
        assert!(left_before_right(&[], 2));
        assert!(!left_before_right(&[2, 0], 2));
    }

    #[test]
    fn test_project_folds_into_join() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let b = scan(&mut arena, "B", &["z", "w"]);
        let j = arena.join(a, b, eq(named("y"), named("z")));
        let p = arena.add(Operator::Project {
            input: j,
            columns: vec![named("x"), named("w")],
        });
        let root = run(
            &mut arena,
            p,
            vec![
                Box::new(JoinToProjectingJoin),
                Box::new(ProjectIntoJoin),
                Box::new(ProjectToApply),
            ],
        );
        match arena.get(root).unwrap() {
            Operator::Join {
                condition,
                output_columns,
                ..
            } => {
                assert_eq!(*condition, eq(col(1), col(2)));
                assert_eq!(output_columns.as_deref(), Some(&[0, 3][..]));
            }
            other => panic!("expected join, got {other:?}"),
        }
        assert_eq!(arena.scheme(root).unwrap().names(), vec!["x", "w"]);
    }

    #[test]
    fn test_interleaving_project_becomes_apply() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let b = scan(&mut arena, "B", &["z"]);
        let j = arena.join(a, b, eq(col(0), col(2)));
        let p = arena.add(Operator::Project {
            input: j,
            columns: vec![named("z"), named("x")],
        });
        let root = run(
            &mut arena,
            p,
            vec![
                Box::new(JoinToProjectingJoin),
                Box::new(ProjectIntoJoin),
                Box::new(ProjectToApply),
            ],
        );
        let Operator::Apply { emitters, .. } = arena.get(root).unwrap() else {
            panic!("expected apply");
        };
        assert_eq!(emitters, &vec![Emitter::unnamed(col(2)), Emitter::unnamed(col(0))]);
    }

    #[test]
    fn test_stacked_applies_merge_and_keep_names() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let inner = arena.apply(
            a,
            vec![
                Emitter::new("s", binary(BinaryOp::Plus, col(0), col(1))),
                Emitter::unnamed(col(1)),
            ],
        );
        let outer = arena.apply(inner, vec![Emitter::unnamed(col(0)), Emitter::unnamed(col(1))]);
        let before = arena.scheme(outer).unwrap().names();
        let root = run(&mut arena, outer, vec![Box::new(PushApply)]);
        let Operator::Apply { input, emitters } = arena.get(root).unwrap().clone() else {
            panic!("expected apply");
        };
        assert_eq!(input, a);
        assert_eq!(emitters[0].expr, binary(BinaryOp::Plus, col(0), col(1)));
        assert_eq!(emitters[0].name.as_deref(), Some("s"));
        assert_eq!(emitters[1].name, None);
        assert_eq!(arena.scheme(root).unwrap().names(), before);
    }

    #[test]
    fn test_apply_over_join_prunes_output() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let b = scan(&mut arena, "B", &["z", "w"]);
        let j = arena.join(a, b, eq(col(1), col(2)));
        let ap = arena.apply(j, vec![Emitter::new("t", binary(BinaryOp::Times, col(3), col(0)))]);
        let root = run(
            &mut arena,
            ap,
            vec![Box::new(JoinToProjectingJoin), Box::new(PushApply)],
        );
        let Operator::Apply { input, emitters } = arena.get(root).unwrap().clone() else {
            panic!("expected apply");
        };
        assert_eq!(emitters[0].expr, binary(BinaryOp::Times, col(1), col(0)));
        match arena.get(input).unwrap() {
            Operator::Join { output_columns, .. } => {
                assert_eq!(output_columns.as_deref(), Some(&[0, 3][..]))
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_apply_is_absorbed_by_join() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let b = scan(&mut arena, "B", &["z"]);
        let j = arena.join(a, b, eq(col(1), col(2)));
        let ap = arena.apply(j, vec![Emitter::unnamed(col(0)), Emitter::new("z", col(2))]);
        let root = run(
            &mut arena,
            ap,
            vec![Box::new(JoinToProjectingJoin), Box::new(PushApply)],
        );
        assert_eq!(root, j);
        assert_eq!(arena.scheme(root).unwrap().names(), vec!["x", "z"]);
    }

    #[test]
    fn test_group_by_reads_only_what_it_needs() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y", "z"]);
        let g = arena.group_by(a, vec![col(2)], vec![AggregateExpr::Sum(col(1))]);
        let root = run(&mut arena, g, vec![Box::new(RemoveUnusedColumns)]);
        let Operator::GroupBy {
            input,
            grouping,
            aggregates,
            ..
        } = arena.get(root).unwrap().clone()
        else {
            panic!("expected group by");
        };
        assert_eq!(grouping, vec![col(1)]);
        assert_eq!(aggregates, vec![AggregateExpr::Sum(col(0))]);
        assert_eq!(arena.scheme(input).unwrap().names(), vec!["y", "z"]);

        let count = arena.group_by(a, vec![], vec![AggregateExpr::CountAll]);
        let root = run(&mut arena, count, vec![Box::new(RemoveUnusedColumns)]);
        let Operator::GroupBy { input, .. } = arena.get(root).unwrap() else {
            panic!("expected group by");
        };
        assert_eq!(arena.scheme(*input).unwrap().names(), vec!["x"]);
    }

    #[test]
    fn test_join_sides_narrowed() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y", "u"]);
        let b = scan(&mut arena, "B", &["z", "w"]);
        let j = arena.add(Operator::Join {
            left: a,
            right: b,
            condition: eq(col(1), col(3)),
            output_columns: Some(vec![1, 4]),
        });
        let root = run(&mut arena, j, vec![Box::new(RemoveUnusedColumns)]);
        let Operator::Join {
            condition,
            output_columns,
            left,
            right,
        } = arena.get(root).unwrap().clone()
        else {
            panic!("expected join");
        };
        assert_eq!(arena.scheme(left).unwrap().names(), vec!["y"]);
        assert_eq!(right, b);
        assert_eq!(condition, eq(col(0), col(1)));
        assert_eq!(output_columns, Some(vec![0, 2]));
        assert_eq!(arena.scheme(root).unwrap().names(), vec!["y", "w"]);
    }
}
