//! The ordered rule groups that turn a logical plan into a distributed
//! physical plan, and the entry points that compile a plan end to end.

use shardplan_core::algebra::{Operator, PlanArena};
use shardplan_core::config::{Algebra, CompilerConfig};
use shardplan_core::error::{Error, Result};
use shardplan_core::id::NodeId;

use crate::boundary::BreakCommunication;
use crate::catalog::Catalog;
use crate::columns::{
    JoinToProjectingJoin, ProjectIntoJoin, ProjectToApply, PushApply, RemoveUnusedColumns,
};
use crate::distribute::{
    BroadcastBeforeCross, ShuffleBeforeDistinct, ShuffleBeforeJoin, ShuffleBeforeSetop,
};
use crate::fragment::compile_plan;
use crate::groupby::{DistributedGroupBy, SimpleGroupBy};
use crate::hypercube::{HyperCubeShuffleBeforeNaryJoin, OrderByBeforeNaryJoin};
use crate::join_graph::MergeToNaryJoin;
use crate::pushdown::{MergeSelects, PushSelects, SplitSelects};
use crate::rules::{Rule, RuleContext, RuleGroup};
use crate::wire::QueryEncoding;

/// A sequence or parallel block of one statement is just that statement.
pub struct RemoveTrivialSequences;

impl Rule for RemoveTrivialSequences {
    fn name(&self) -> &'static str {
        "Sequence[x] => x"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        match arena.get(id)? {
            Operator::Sequence { children } | Operator::Parallel { children }
                if children.len() == 1 =>
            {
                Ok(children[0])
            }
            _ => Ok(id),
        }
    }
}

fn push_apply() -> RuleGroup {
    RuleGroup::new("push apply", vec![Box::new(PushApply)])
}

/// Rule groups in the order they run for `config`.
pub fn rule_groups(config: &CompilerConfig) -> Vec<RuleGroup> {
    let hypercube = config.algebra == Algebra::HyperCube;
    let mut groups = vec![
        RuleGroup::new("remove trivial sequences", vec![Box::new(RemoveTrivialSequences)]),
        RuleGroup::new("simple group by", vec![Box::new(SimpleGroupBy)]),
        RuleGroup::new(
            "push select",
            vec![Box::new(SplitSelects), Box::new(PushSelects)],
        ),
        RuleGroup::new("merge selects", vec![Box::new(MergeSelects)]),
        RuleGroup::new(
            "push project",
            vec![
                Box::new(JoinToProjectingJoin),
                Box::new(ProjectIntoJoin),
                Box::new(ProjectToApply),
            ],
        ),
    ];
    if hypercube {
        groups.push(RuleGroup::new("merge to n-ary join", vec![Box::new(MergeToNaryJoin)]));
    }
    for _ in 0..config.push_apply_rounds {
        groups.push(push_apply());
        groups.push(RuleGroup::new(
            "remove unused columns",
            vec![Box::new(RemoveUnusedColumns)],
        ));
    }
    groups.push(push_apply());
    groups.push(RuleGroup::new(
        "shuffle logic",
        vec![
            Box::new(ShuffleBeforeDistinct),
            Box::new(ShuffleBeforeSetop),
            Box::new(ShuffleBeforeJoin),
            Box::new(BroadcastBeforeCross),
        ],
    ));
    groups.push(RuleGroup::new(
        "distributed group by",
        vec![Box::new(DistributedGroupBy), Box::new(SimpleGroupBy)],
    ));
    if hypercube {
        groups.push(RuleGroup::new(
            "hypercube shuffle",
            vec![
                Box::new(HyperCubeShuffleBeforeNaryJoin),
                Box::new(OrderByBeforeNaryJoin),
            ],
        ));
    }
    groups.push(RuleGroup::new(
        "break communication",
        vec![Box::new(BreakCommunication)],
    ));
    groups
}

/// Rewrite the logical plan under `root` into a physical plan whose exchanges
/// are all split into producer/consumer pairs.
pub fn optimize(
    arena: &mut PlanArena,
    root: NodeId,
    catalog: &dyn Catalog,
    config: &CompilerConfig,
) -> Result<NodeId> {
    config.validate()?;
    if catalog.worker_count() == 0 {
        return Err(Error::Config("catalog reports no workers".into()));
    }
    let ctx = RuleContext { catalog, config };
    let mut cur = root;
    for group in rule_groups(config) {
        cur = group.apply(arena, cur, &ctx)?;
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        algebra = ?config.algebra,
        workers = catalog.worker_count(),
        nodes = arena.len(),
        "plan optimized"
    );

    Ok(cur)
}

/// Optimize and compile one plan into the coordinator's query document.
pub fn compile_query(
    raw_query: &str,
    arena: &mut PlanArena,
    root: NodeId,
    catalog: &dyn Catalog,
    config: &CompilerConfig,
) -> Result<QueryEncoding> {
    let logical_ra = arena.render(root)?;
    let physical = optimize(arena, root, catalog, config)?;
    let plan = compile_plan(arena, physical)?;
    Ok(QueryEncoding {
        raw_datalog: raw_query.to_string(),
        logical_ra,
        plan,
    })
}

/// Root covering every `(label, plan)` statement. Statements whose result is
/// not already stored are stored into the temporary relation named by their
/// label; several statements run in parallel.
pub fn program_root(arena: &mut PlanArena, statements: &[(String, NodeId)]) -> Result<NodeId> {
    let mut roots = Vec::with_capacity(statements.len());
    for (label, root) in statements {
        let op = arena.get(*root)?;
        let stored = matches!(op, Operator::Store { .. } | Operator::StoreTemp { .. })
            || op.is_control();
        if stored {
            roots.push(*root);
            continue;
        }
        if label.is_empty() {
            return Err(Error::Config(format!(
                "unstored statement {} needs a label",
                arena.label(*root)?
            )));
        }
        roots.push(arena.add(Operator::StoreTemp {
            input: *root,
            name: label.clone(),
        }));
    }
    match roots.as_slice() {
        [] => Err(Error::Config("program has no statements".into())),
        [only] => Ok(*only),
        _ => Ok(arena.add(Operator::Parallel { children: roots })),
    }
}

/// `compile_query` over the root built by `program_root`.
pub fn compile_program(
    raw_query: &str,
    arena: &mut PlanArena,
    statements: &[(String, NodeId)],
    catalog: &dyn Catalog,
    config: &CompilerConfig,
) -> Result<QueryEncoding> {
    let root = program_root(arena, statements)?;
    compile_query(raw_query, arena, root, catalog, config)
}
