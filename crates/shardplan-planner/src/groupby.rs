//! Group-by normalization and two-phase distributed aggregation.

use shardplan_core::aggregate::AggregateExpr;
use shardplan_core::algebra::{default_column_name, AggPhase, Emitter, Exchange, Operator, PlanArena};
use shardplan_core::error::{Error, Result};
use shardplan_core::expr::{col, Expr};
use shardplan_core::id::NodeId;

use crate::rules::{Rule, RuleContext};

/// Makes group-by references positional and hoists computed grouping terms
/// and aggregate inputs into an `Apply` below, so the group-by itself only
/// reads plain columns.
pub struct SimpleGroupBy;

impl Rule for SimpleGroupBy {
    fn name(&self) -> &'static str {
        "GroupBy => Apply, GroupBy"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::GroupBy {
            input,
            grouping,
            aggregates,
            phase,
        } = arena.get(id)?.clone()
        else {
            return Ok(id);
        };

        let scheme = arena.scheme(input)?;
        let mut grouping = grouping
            .iter()
            .map(|g| g.to_positional(&scheme))
            .collect::<Result<Vec<_>>>()?;
        let mut aggregates = aggregates;
        for agg in &mut aggregates {
            if let Some(e) = agg.input_mut() {
                *e = e.to_positional(&scheme)?;
            }
        }

        let computed = grouping
            .iter()
            .chain(aggregates.iter().filter_map(|a| a.input()))
            .any(|e| !matches!(e, Expr::Column(_)));
        if computed {
            // Grouping terms first, then aggregate inputs, each listed once.
            let mut hoisted: Vec<Expr> = Vec::new();
            let mut slot = |e: &mut Expr| {
                let pos = match hoisted.iter().position(|h| h == e) {
                    Some(p) => p,
                    None => {
                        hoisted.push(e.clone());
                        hoisted.len() - 1
                    }
                };
                *e = col(pos);
            };
            grouping.iter_mut().for_each(&mut slot);
            aggregates
                .iter_mut()
                .filter_map(AggregateExpr::input_mut)
                .for_each(&mut slot);

            let emitters = hoisted.into_iter().map(Emitter::unnamed).collect();
            let apply = arena.apply(input, emitters);
            arena.replace(
                id,
                Operator::GroupBy {
                    input: apply,
                    grouping,
                    aggregates,
                    phase,
                },
            )?;
            return Ok(id);
        }

        arena.replace(
            id,
            Operator::GroupBy {
                input,
                grouping,
                aggregates,
                phase,
            },
        )?;
        Ok(id)
    }
}

/// Splits a logical group-by into local aggregation, a network transfer and
/// merge aggregation, with an optional finalizing `Apply`.
pub struct DistributedGroupBy;

impl Rule for DistributedGroupBy {
    fn name(&self) -> &'static str {
        "GroupBy => GroupBy[Local], Shuffle/Collect, GroupBy[Merge]"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::GroupBy {
            input,
            grouping,
            aggregates,
            phase: AggPhase::Logical,
        } = arena.get(id)?.clone()
        else {
            return Ok(id);
        };
        if let Some(g) = grouping.iter().find(|g| !matches!(g, Expr::Column(_))) {
            return Err(Error::Invariant(format!(
                "grouping term `{g}` must be a column before distribution"
            )));
        }
        let n = grouping.len();

        let mut locals: Vec<AggregateExpr> = Vec::new();
        let mut merge_kinds = Vec::new();
        let mut offsets: Vec<Vec<usize>> = Vec::with_capacity(aggregates.len());
        let mut finalizers = Vec::with_capacity(aggregates.len());
        for agg in &aggregates {
            let d = agg.decompose();
            let mut offs = Vec::with_capacity(d.locals.len());
            for (local, merge) in d.locals.into_iter().zip(d.merges) {
                let idx = match locals.iter().position(|l| *l == local) {
                    Some(i) => i,
                    None => {
                        locals.push(local);
                        merge_kinds.push(merge);
                        locals.len() - 1
                    }
                };
                offs.push(idx);
            }
            offsets.push(offs);
            finalizers.push(d.finalizer);
        }

        let local = arena.add(Operator::GroupBy {
            input,
            grouping,
            aggregates: locals,
            phase: AggPhase::Local,
        });
        let exchange = if n == 0 {
            Exchange::Collect
        } else {
            Exchange::Shuffle {
                columns: (0..n).collect(),
            }
        };
        let moved = arena.exchange(local, exchange);
        let merge = Operator::GroupBy {
            input: moved,
            grouping: (0..n).map(col).collect(),
            aggregates: merge_kinds
                .iter()
                .enumerate()
                .map(|(k, m)| m.over(n + k))
                .collect(),
            phase: AggPhase::Merge,
        };

        // The merge output already has the logical layout when each logical
        // aggregate owns exactly the local aggregate at its own position.
        let same_layout = finalizers.iter().all(Option::is_none)
            && offsets.iter().enumerate().all(|(j, o)| o.as_slice() == [j]);
        if same_layout {
            arena.replace(id, merge)?;
            return Ok(id);
        }

        let merged = arena.add(merge);
        let mut emitters: Vec<Emitter> = (0..n).map(|i| Emitter::unnamed(col(i))).collect();
        for (j, (offs, finalizer)) in offsets.iter().zip(finalizers).enumerate() {
            let abs: Vec<usize> = offs.iter().map(|k| n + k).collect();
            let expr = match finalizer {
                Some(f) => f.resolve_merge_slots(&abs)?,
                None => col(abs[0]),
            };
            emitters.push(Emitter::new(default_column_name(n + j), expr));
        }
        arena.replace(
            id,
            Operator::Apply {
                input: merged,
                emitters,
            },
        )?;
        Ok(id)
    }
}
