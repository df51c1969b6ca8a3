//! HyperCube shuffles in front of multiway joins.

use shardplan_core::algebra::{Exchange, ExchangeKind, HyperCubeSpec, Operator, PlanArena};
use shardplan_core::error::{Error, Result};
use shardplan_core::id::NodeId;
use shardplan_hc::{get_cell_partition, search_dim_sizes, ReverseIndex};

use crate::rules::{Rule, RuleContext};

/// Estimated tuple count of the subtree at `id`.
///
/// Stored relations ask the catalog; selections, applies, exchanges and sorts
/// are assumed to keep their input size; anything else gets the configured
/// default.
pub fn estimate_cardinality(arena: &PlanArena, id: NodeId, ctx: &RuleContext<'_>) -> Result<u64> {
    let mut cur = id;
    loop {
        match arena.get(cur)? {
            Operator::Scan { relation, .. } => return Ok(ctx.catalog.estimate_cardinality(relation)),
            Operator::Select { input, .. }
            | Operator::Apply { input, .. }
            | Operator::Exchange { input, .. }
            | Operator::OrderBy { input, .. } => cur = *input,
            _ => return Ok(ctx.config.default_cardinality),
        }
    }
}

/// A hypercube shuffle, possibly already sorted for the leapfrog join.
fn is_hypercube_shuffled(arena: &PlanArena, id: NodeId) -> Result<bool> {
    let op = match arena.get(id)? {
        Operator::OrderBy { input, .. } => arena.get(*input)?,
        op => op,
    };
    Ok(op.is_exchange(ExchangeKind::HyperCube))
}

/// Split global join-column positions into `(child, column)` pairs.
fn localize(widths: &[usize], conditions: &[Vec<usize>]) -> Result<Vec<Vec<(usize, usize)>>> {
    conditions
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|&pos| {
                    let mut offset = 0;
                    for (child, &w) in widths.iter().enumerate() {
                        if pos < offset + w {
                            return Ok((child, pos - offset));
                        }
                        offset += w;
                    }
                    Err(Error::Invariant(format!(
                        "join column ${pos} beyond the children's {offset} columns"
                    )))
                })
                .collect()
        })
        .collect()
}

/// Chooses hypercube dimension sizes for a multiway join and routes each
/// child through its own HyperCube shuffle.
pub struct HyperCubeShuffleBeforeNaryJoin;

impl Rule for HyperCubeShuffleBeforeNaryJoin {
    fn name(&self) -> &'static str {
        "NaryJoin => HyperCubeShuffle, NaryJoin"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::NaryJoin {
            children,
            conditions,
            ..
        } = arena.get(id)?.clone()
        else {
            return Ok(id);
        };

        let mut shuffled = 0;
        for &c in &children {
            if is_hypercube_shuffled(arena, c)? {
                shuffled += 1;
            }
        }
        if shuffled == children.len() {
            return Ok(id);
        }
        if shuffled > 0 {
            return Err(Error::InconsistentShuffleState(format!(
                "{} of {} inputs of {} are already hypercube shuffled",
                shuffled,
                children.len(),
                arena.label(id)?
            )));
        }

        let widths = children
            .iter()
            .map(|&c| Ok(arena.scheme(c)?.len()))
            .collect::<Result<Vec<_>>>()?;
        let index = ReverseIndex::build(&widths, &localize(&widths, &conditions)?)?;
        let sizes = children
            .iter()
            .map(|&c| estimate_cardinality(arena, c, ctx))
            .collect::<Result<Vec<_>>>()?;

        let workers = ctx.catalog.worker_count();
        let assignment = search_dim_sizes(
            workers,
            conditions.len(),
            &sizes,
            &index,
            ctx.config.max_hypercube_states,
        )?;
        #[cfg(debug_assertions)]
        shardplan_hc::verify::assert_within_budget(&assignment.dim_sizes, workers);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            node = %id,
            dims = ?assignment.dim_sizes,
            workload = assignment.workload,
            visited = assignment.visited,
            "hypercube assignment chosen"
        );

        for (i, &child) in children.iter().enumerate() {
            let (mapped_dims, hashed_columns): (Vec<usize>, Vec<usize>) =
                index.hashed_fields(i).into_iter().unzip();
            let cell_partition =
                get_cell_partition(&assignment.dim_sizes, &index, i, &hashed_columns)?;
            let spec = HyperCubeSpec {
                hashed_columns,
                mapped_dims,
                dim_sizes: assignment.dim_sizes.clone(),
                cell_partition,
            };
            let shuffle = arena.exchange(child, Exchange::HyperCube(spec));
            arena.set_child(id, i, shuffle)?;
        }
        Ok(id)
    }
}

/// Sorts every hypercube-shuffled join input on its hashed columns, which the
/// leapfrog join needs.
pub struct OrderByBeforeNaryJoin;

impl Rule for OrderByBeforeNaryJoin {
    fn name(&self) -> &'static str {
        "HyperCubeShuffle, NaryJoin => HyperCubeShuffle, OrderBy, NaryJoin"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::NaryJoin { children, .. } = arena.get(id)?.clone() else {
            return Ok(id);
        };

        let mut ordered = 0;
        for &c in &children {
            if matches!(arena.get(c)?, Operator::OrderBy { .. }) {
                ordered += 1;
            }
        }
        if ordered == children.len() {
            return Ok(id);
        }
        if ordered > 0 {
            return Err(Error::Invariant(format!(
                "only {} of {} inputs of {} are sorted",
                ordered,
                children.len(),
                arena.label(id)?
            )));
        }

        for (i, &child) in children.iter().enumerate() {
            let sort_columns = match arena.get(child)? {
                Operator::Exchange {
                    exchange: Exchange::HyperCube(spec),
                    ..
                } => spec.hashed_columns.clone(),
                other => {
                    return Err(Error::Invariant(format!(
                        "input {i} of {} is a {}, not a hypercube shuffle",
                        arena.label(id)?,
                        other.kind_name()
                    )))
                }
            };
            let ascending = vec![true; sort_columns.len()];
            let sorted = arena.add(Operator::OrderBy {
                input: child,
                sort_columns,
                ascending,
            });
            arena.set_child(id, i, sorted)?;
        }
        Ok(id)
    }
}
