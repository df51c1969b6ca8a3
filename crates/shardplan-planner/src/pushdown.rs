//! Selection pushdown: split conjunctions, migrate each predicate as far down
//! as it commutes, then merge adjacent selections again.

use std::collections::BTreeMap;

use shardplan_core::algebra::{Operator, PlanArena};
use shardplan_core::error::Result;
use shardplan_core::expr::{and, conjoin, Expr};
use shardplan_core::id::NodeId;
use shardplan_core::schema::Scheme;

use crate::rules::{Rule, RuleContext};

/// `Select(a AND b AND c)` becomes `Select(a, Select(b, Select(c)))`, with
/// every reference made positional.
pub struct SplitSelects;

impl Rule for SplitSelects {
    fn name(&self) -> &'static str {
        "Select => Select, Select"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::Select {
            input,
            condition,
            pushed,
        } = arena.get(id)?.clone()
        else {
            return Ok(id);
        };

        let scheme = arena.scheme(input)?;
        let mut conjuncts = condition
            .conjuncts()
            .iter()
            .map(|c| c.to_positional(&scheme))
            .collect::<Result<Vec<_>>>()?;
        let top = conjuncts.remove(0);

        let mut below = input;
        for c in conjuncts.into_iter().rev() {
            below = arena.add(Operator::Select {
                input: below,
                condition: c,
                pushed,
            });
        }
        arena.replace(
            id,
            Operator::Select {
                input: below,
                condition: top,
                pushed,
            },
        )?;
        Ok(id)
    }
}

/// Moves every not-yet-pushed selection down through the operators it
/// commutes with.
pub struct PushSelects;

impl Rule for PushSelects {
    fn name(&self) -> &'static str {
        "Select, Cross/Join => Join; Select, Apply => Apply, Select; Select, GroupBy => GroupBy, Select"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        // Each iteration consumes one unpushed Select from the top of the
        // chain, so this runs at most once per Select in the chain.
        let mut root = id;
        loop {
            let (input, condition) = match arena.get(root)? {
                Operator::Select {
                    input,
                    condition,
                    pushed: false,
                } => (*input, condition.clone()),
                _ => return Ok(root),
            };
            root = descend(arena, input, condition)?;
        }
    }
}

/// Push `cond` (positional over the output of `op`) into the subtree at `op`,
/// returning the node that replaces `op` in its parent.
fn descend(arena: &mut PlanArena, op: NodeId, cond: Expr) -> Result<NodeId> {
    match arena.get(op)?.clone() {
        Operator::Select { input, .. } => {
            let pushed = descend(arena, input, cond)?;
            arena.set_child(op, 0, pushed)?;
            return Ok(op);
        }
        Operator::Join {
            left,
            right,
            output_columns,
            ..
        } => {
            let mut over_inputs = cond.clone();
            if let Some(cols) = &output_columns {
                let map: BTreeMap<usize, usize> = cols.iter().copied().enumerate().collect();
                over_inputs.reindex(&map)?;
            }
            if let Some(done) = descend_binary(arena, op, left, right, over_inputs)? {
                return Ok(done);
            }
        }
        Operator::CrossProduct { left, right } => {
            if let Some(done) = descend_binary(arena, op, left, right, cond.clone())? {
                return Ok(done);
            }
        }
        Operator::Apply { input, emitters } => {
            let exprs: Vec<Expr> = emitters.into_iter().map(|e| e.expr).collect();
            if let Some(map) = verbatim_map(&cond, &exprs, &arena.scheme(input)?) {
                return descend_unary(arena, op, input, cond, &map);
            }
        }
        Operator::Project { input, columns } => {
            if let Some(map) = verbatim_map(&cond, &columns, &arena.scheme(input)?) {
                return descend_unary(arena, op, input, cond, &map);
            }
        }
        Operator::GroupBy {
            input, grouping, ..
        } => {
            if let Some(map) = verbatim_map(&cond, &grouping, &arena.scheme(input)?) {
                return descend_unary(arena, op, input, cond, &map);
            }
        }
        _ => {}
    }

    Ok(arena.add(Operator::Select {
        input: op,
        condition: cond,
        pushed: true,
    }))
}

fn descend_unary(
    arena: &mut PlanArena,
    op: NodeId,
    input: NodeId,
    mut cond: Expr,
    map: &BTreeMap<usize, usize>,
) -> Result<NodeId> {
    cond.reindex(map)?;
    let pushed = descend(arena, input, cond)?;
    arena.set_child(op, 0, pushed)?;
    Ok(op)
}

/// When every column `cond` reads is a verbatim copy of an input column,
/// the map from output to input positions.
fn verbatim_map(cond: &Expr, exprs: &[Expr], input: &Scheme) -> Option<BTreeMap<usize, usize>> {
    cond.accessed_columns()
        .into_iter()
        .map(|a| exprs.get(a)?.column_position(input).map(|p| (a, p)))
        .collect()
}

/// `cond` is positional over `left ++ right`. `None` when it has to stay above.
fn descend_binary(
    arena: &mut PlanArena,
    op: NodeId,
    left: NodeId,
    right: NodeId,
    mut cond: Expr,
) -> Result<Option<NodeId>> {
    let left_len = arena.scheme(left)?.len();
    let accessed = cond.accessed_columns();

    if accessed.iter().all(|&c| c < left_len) {
        let pushed = descend(arena, left, cond)?;
        arena.set_child(op, 0, pushed)?;
        return Ok(Some(op));
    }
    if accessed.iter().all(|&c| c >= left_len) {
        cond.rebase(left_len)?;
        let pushed = descend(arena, right, cond)?;
        arena.set_child(op, 1, pushed)?;
        return Ok(Some(op));
    }
    if cond.column_equality().is_none() {
        return Ok(None);
    }

    // A column from each side compared for equality: becomes a join key.
    let joined = match arena.get(op)?.clone() {
        Operator::Join {
            condition,
            output_columns,
            ..
        } => Operator::Join {
            left,
            right,
            condition: and(condition, cond),
            output_columns,
        },
        _ => Operator::Join {
            left,
            right,
            condition: cond,
            output_columns: None,
        },
    };
    arena.replace(op, joined)?;
    Ok(Some(op))
}

/// Collapses a chain of Selects into one conjunctive Select.
pub struct MergeSelects;

impl Rule for MergeSelects {
    fn name(&self) -> &'static str {
        "Select, Select => Select"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let mut conjuncts = Vec::new();
        let mut all_pushed = true;
        let mut cur = id;
        while let Operator::Select {
            input,
            condition,
            pushed,
        } = arena.get(cur)?
        {
            conjuncts.extend(condition.conjuncts());
            all_pushed &= *pushed;
            cur = *input;
        }
        if cur == id {
            return Ok(id);
        }
        let Some(condition) = conjoin(conjuncts) else {
            return Ok(id);
        };
        arena.replace(
            id,
            Operator::Select {
                input: cur,
                condition,
                pushed: all_pushed,
            },
        )?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FakeCatalog;
    use crate::rules::RuleGroup;
    use shardplan_core::algebra::Emitter;
    use shardplan_core::aggregate::AggregateExpr;
    use shardplan_core::config::CompilerConfig;
    use shardplan_core::expr::{binary, col, eq, lit_int, named, BinaryOp};
    use shardplan_core::relation::RelationKey;
    use shardplan_core::schema::{DataType, Field};

    fn scan(arena: &mut PlanArena, name: &str, cols: &[&str]) -> NodeId {
        let scheme = Scheme::new(cols.iter().map(|c| Field::new(*c, DataType::Int64)).collect());
        arena.scan(RelationKey::new("public", "adhoc", name), scheme)
    }

    fn push_select(arena: &mut PlanArena, root: NodeId) -> NodeId {
        let catalog = FakeCatalog::new(4);
        let config = CompilerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let push = RuleGroup::new("push select", vec![Box::new(SplitSelects), Box::new(PushSelects)]);
        let merge = RuleGroup::new("merge selects", vec![Box::new(MergeSelects)]);
        let root = push.apply(arena, root, &ctx).unwrap();
        merge.apply(arena, root, &ctx).unwrap()
    }

    #[test]
    fn test_predicates_reach_their_side_of_a_join() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let b = scan(&mut arena, "B", &["z", "w"]);
        let cross = arena.add(Operator::CrossProduct { left: a, right: b });
        let cond = and(
            and(eq(named("x"), lit_int(1)), eq(named("w"), lit_int(2))),
            eq(named("y"), named("z")),
        );
        let sel = arena.select(cross, cond);
        let root = push_select(&mut arena, sel);

        let Operator::Join {
            left,
            right,
            condition,
            ..
        } = arena.get(root).unwrap().clone()
        else {
            panic!("cross product should become a join: {}", arena.render(root).unwrap());
        };
        assert_eq!(condition, eq(col(1), col(2)));
        match arena.get(left).unwrap() {
            Operator::Select { condition, pushed, .. } => {
                assert_eq!(*condition, eq(col(0), lit_int(1)));
                assert!(*pushed);
            }
            other => panic!("unexpected left {other:?}"),
        }
        match arena.get(right).unwrap() {
            Operator::Select { condition, .. } => assert_eq!(*condition, eq(col(1), lit_int(2))),
            other => panic!("unexpected right {other:?}"),
        }
    }

    #[test]
    fn test_stops_at_computed_columns() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let ap = arena.apply(
            a,
            vec![
                Emitter::unnamed(col(1)),
                Emitter::new("s", binary(BinaryOp::Plus, col(0), col(1))),
            ],
        );
        let cond = and(eq(col(0), lit_int(3)), eq(col(1), lit_int(4)));
        let sel = arena.select(ap, cond);
        let root = push_select(&mut arena, sel);
        let rendered = arena.render(root).unwrap();
        let expected = "Select($1 = 4) [pushed]\n  Apply($1, s=$0 + $1)\n    Select($1 = 3) [pushed]\n      Scan(public:adhoc:A)\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_through_group_by_keys_only() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let g = arena.group_by(a, vec![col(1)], vec![AggregateExpr::CountAll]);
        let on_key = arena.select(g, eq(col(0), lit_int(5)));
        let root = push_select(&mut arena, on_key);
        assert!(matches!(arena.get(root).unwrap(), Operator::GroupBy { .. }));
        assert!(arena.render(root).unwrap().contains("Select($1 = 5)"));

        let on_count = arena.select(root, eq(col(1), lit_int(5)));
        let root = push_select(&mut arena, on_count);
        assert!(matches!(arena.get(root).unwrap(), Operator::Select { .. }));
    }

    #[test]
    fn test_split_push_merge_is_idempotent() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", &["x", "y"]);
        let b = scan(&mut arena, "B", &["z"]);
        let j = arena.join(a, b, eq(col(1), col(2)));
        let cond = and(
            eq(named("x"), lit_int(1)),
            and(eq(named("y"), lit_int(2)), eq(named("z"), lit_int(3))),
        );
        let sel = arena.select(j, cond);
        let once = push_select(&mut arena, sel);
        let first = arena.render(once).unwrap();
        let twice = push_select(&mut arena, once);
        assert_eq!(first, arena.render(twice).unwrap());
        assert!(first.contains("Select(($0 = 1) AND ($1 = 2)) [pushed]"));
    }
}
