//! Inserting logical network transfers in front of operators that need
//! co-located or replicated input.

use shardplan_core::algebra::{Exchange, ExchangeKind, Operator, PlanArena};
use shardplan_core::error::{Error, Result};
use shardplan_core::expr::Expr;
use shardplan_core::id::NodeId;

use crate::rules::{Rule, RuleContext};

/// Split an equijoin condition over `left ++ right` into the key columns of
/// each side, in conjunct order.
pub(crate) fn equijoin_columns(
    condition: &Expr,
    left_len: usize,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for c in condition.conjuncts() {
        let (a, b) = c.column_equality().ok_or_else(|| {
            Error::InvalidJoinCondition(format!("`{c}` is not an equality between two columns"))
        })?;
        let (l, r) = match (a < left_len, b < left_len) {
            (true, false) => (a, b - left_len),
            (false, true) => (b, a - left_len),
            _ => {
                return Err(Error::InvalidJoinCondition(format!(
                    "`{c}` does not compare a left column with a right column"
                )))
            }
        };
        left.push(l);
        right.push(r);
    }
    Ok((left, right))
}

/// `Ok(true)` when both inputs are already shuffled, `Ok(false)` when neither
/// is, and an error when only one is.
fn check_shuffle_xor(arena: &PlanArena, id: NodeId, left: NodeId, right: NodeId) -> Result<bool> {
    let l = arena.get(left)?.is_exchange(ExchangeKind::Shuffle);
    let r = arena.get(right)?.is_exchange(ExchangeKind::Shuffle);
    if l != r {
        return Err(Error::InconsistentShuffleState(format!(
            "only the {} input of {} is shuffled",
            if l { "left" } else { "right" },
            arena.label(id)?
        )));
    }
    Ok(l)
}

fn shuffle_all_columns(arena: &mut PlanArena, input: NodeId) -> Result<NodeId> {
    let columns = (0..arena.scheme(input)?.len()).collect();
    Ok(arena.exchange(input, Exchange::Shuffle { columns }))
}

pub struct ShuffleBeforeDistinct;

impl Rule for ShuffleBeforeDistinct {
    fn name(&self) -> &'static str {
        "Distinct => Shuffle, Distinct"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::Distinct { input } = *arena.get(id)? else {
            return Ok(id);
        };
        if arena.get(input)?.is_exchange(ExchangeKind::Shuffle) {
            return Ok(id);
        }
        let shuffled = shuffle_all_columns(arena, input)?;
        arena.set_child(id, 0, shuffled)?;
        Ok(id)
    }
}

/// Difference and intersection compare whole tuples, so both sides are
/// shuffled on every column.
pub struct ShuffleBeforeSetop;

impl Rule for ShuffleBeforeSetop {
    fn name(&self) -> &'static str {
        "Difference/Intersection => Shuffle, Difference/Intersection"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let (left, right) = match *arena.get(id)? {
            Operator::Difference { left, right } | Operator::Intersection { left, right } => {
                (left, right)
            }
            _ => return Ok(id),
        };
        if check_shuffle_xor(arena, id, left, right)? {
            return Ok(id);
        }
        let l = shuffle_all_columns(arena, left)?;
        let r = shuffle_all_columns(arena, right)?;
        arena.set_child(id, 0, l)?;
        arena.set_child(id, 1, r)?;
        Ok(id)
    }
}

/// Hash-partitions both join inputs on their join keys.
pub struct ShuffleBeforeJoin;

impl Rule for ShuffleBeforeJoin {
    fn name(&self) -> &'static str {
        "Join => Shuffle, Join"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let (left, right, condition) = match arena.get(id)? {
            Operator::Join {
                left,
                right,
                condition,
                ..
            } => (*left, *right, condition.clone()),
            _ => return Ok(id),
        };
        if check_shuffle_xor(arena, id, left, right)? {
            return Ok(id);
        }

        let left_len = arena.scheme(left)?.len();
        let label = arena.label(id)?;
        let (left_keys, right_keys) =
            equijoin_columns(&condition, left_len).map_err(|e| match e {
                Error::InvalidJoinCondition(msg) => {
                    Error::InvalidJoinCondition(format!("{msg} in {label}"))
                }
                other => other,
            })?;
        let l = arena.exchange(left, Exchange::Shuffle { columns: left_keys });
        let r = arena.exchange(right, Exchange::Shuffle { columns: right_keys });
        arena.set_child(id, 0, l)?;
        arena.set_child(id, 1, r)?;
        Ok(id)
    }
}

/// A cross product replicates its right input to every worker.
pub struct BroadcastBeforeCross;

impl Rule for BroadcastBeforeCross {
    fn name(&self) -> &'static str {
        "CrossProduct => Broadcast, CrossProduct"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::CrossProduct { right, .. } = *arena.get(id)? else {
            return Ok(id);
        };
        if arena.get(right)?.is_exchange(ExchangeKind::Broadcast) {
            return Ok(id);
        }
        let broadcast = arena.exchange(right, Exchange::Broadcast);
        arena.set_child(id, 1, broadcast)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FakeCatalog;
    use crate::rules::RuleGroup;
    use shardplan_core::config::CompilerConfig;
    use shardplan_core::expr::{and, binary, col, eq, BinaryOp};
    use shardplan_core::relation::RelationKey;
    use shardplan_core::schema::{DataType, Field, Scheme};

    fn scan(arena: &mut PlanArena, name: &str, width: usize) -> NodeId {
        let scheme = Scheme::new(
            (0..width)
                .map(|i| Field::new(format!("{name}{i}"), DataType::Int64))
                .collect(),
        );
        arena.scan(RelationKey::new("public", "adhoc", name), scheme)
    }

    fn shuffle_logic(arena: &mut PlanArena, root: NodeId) -> Result<NodeId> {
        let catalog = FakeCatalog::new(4);
        let config = CompilerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        RuleGroup::new(
            "shuffle logic",
            vec![
                Box::new(ShuffleBeforeDistinct),
                Box::new(ShuffleBeforeSetop),
                Box::new(ShuffleBeforeJoin),
                Box::new(BroadcastBeforeCross),
            ],
        )
        .apply(arena, root, &ctx)
    }

    #[test]
    fn test_equijoin_columns_either_orientation() {
        let cond = and(eq(col(0), col(3)), eq(col(4), col(1)));
        assert_eq!(equijoin_columns(&cond, 3).unwrap(), (vec![0, 1], vec![0, 1]));
        assert!(matches!(
            equijoin_columns(&eq(col(0), col(1)), 3),
            Err(Error::InvalidJoinCondition(_))
        ));
        assert!(matches!(
            equijoin_columns(&binary(BinaryOp::Lt, col(0), col(3)), 3),
            Err(Error::InvalidJoinCondition(_))
        ));
    }

    #[test]
    fn test_join_inputs_shuffled_on_keys() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", 2);
        let b = scan(&mut arena, "B", 2);
        let j = arena.join(a, b, eq(col(1), col(2)));
        let root = shuffle_logic(&mut arena, j).unwrap();
        let rendered = arena.render(root).unwrap();
        assert_eq!(
            rendered,
            "Join($1 = $2)\n  Shuffle(h($1))\n    Scan(public:adhoc:A)\n  Shuffle(h($0))\n    Scan(public:adhoc:B)\n"
        );
        // Second pass sees both sides shuffled and leaves them alone.
        let again = shuffle_logic(&mut arena, root).unwrap();
        assert_eq!(rendered, arena.render(again).unwrap());
    }

    #[test]
    fn test_one_sided_shuffle_rejected() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", 1);
        let b = scan(&mut arena, "B", 1);
        let sa = arena.exchange(a, Exchange::Shuffle { columns: vec![0] });
        let d = arena.add(Operator::Difference { left: sa, right: b });
        assert!(matches!(
            shuffle_logic(&mut arena, d),
            Err(Error::InconsistentShuffleState(_))
        ));
    }

    #[test]
    fn test_non_equijoin_rejected() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", 1);
        let b = scan(&mut arena, "B", 1);
        let j = arena.join(a, b, binary(BinaryOp::Lt, col(0), col(1)));
        assert!(matches!(
            shuffle_logic(&mut arena, j),
            Err(Error::InvalidJoinCondition(_))
        ));
    }

    #[test]
    fn test_distinct_intersection_and_cross() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A", 2);
        let b = scan(&mut arena, "B", 2);
        let c = scan(&mut arena, "C", 1);
        let i = arena.add(Operator::Intersection { left: a, right: b });
        let d = arena.add(Operator::Distinct { input: i });
        let x = arena.add(Operator::CrossProduct { left: d, right: c });
        let root = shuffle_logic(&mut arena, x).unwrap();
        let expected = "\
CrossProduct
  Distinct
    Shuffle(h($0,$1))
      Intersection
        Shuffle(h($0,$1))
          Scan(public:adhoc:A)
        Shuffle(h($0,$1))
          Scan(public:adhoc:B)
  Broadcast
    Scan(public:adhoc:C)
";
        assert_eq!(arena.render(root).unwrap(), expected);
    }
}
