//! Cutting the physical tree into fragments and compiling each fragment.
//!
//! A fragment is everything reachable from its root without passing through a
//! fragment leaf (a consumer or a stored-relation scan). The children of a
//! fragment leaf start new fragments, processed breadth first, so the fragment
//! holding the plan root always comes first.

use std::collections::VecDeque;

use shardplan_core::algebra::{Operator, PlanArena};
use shardplan_core::error::{Error, Result};
use shardplan_core::id::NodeId;
use shardplan_core::relation::RelationKey;

use crate::wire::{compile_operator, FragmentEncoding, OpIdAllocator, PlanEncoding};

/// Fragments under `root`, each listed innermost leaf first and root last.
pub fn extract_fragments(arena: &PlanArena, root: NodeId) -> Result<Vec<Vec<NodeId>>> {
    let mut fragments = Vec::new();
    let mut roots = VecDeque::from([root]);
    while let Some(fragment_root) = roots.pop_front() {
        let mut nodes = Vec::new();
        // Children are pushed left to right, so the rightmost is visited
        // first and the reversed visit order lists the leftmost leaf first.
        let mut stack = vec![fragment_root];
        while let Some(id) = stack.pop() {
            let op = arena.get(id)?;
            nodes.push(id);
            if op.is_fragment_leaf() {
                roots.extend(op.children());
            } else {
                stack.extend(op.children());
            }
        }
        nodes.reverse();
        fragments.push(nodes);
    }
    Ok(fragments)
}

/// Compiles plans of one program. Op ids and generated temp names are unique
/// across everything a single compiler emits.
pub struct PlanCompiler<'a> {
    arena: &'a mut PlanArena,
    ids: OpIdAllocator,
    loops: usize,
}

impl<'a> PlanCompiler<'a> {
    pub fn new(arena: &'a mut PlanArena) -> Self {
        Self {
            arena,
            ids: OpIdAllocator::new(),
            loops: 0,
        }
    }

    pub fn compile(&mut self, root: NodeId) -> Result<PlanEncoding> {
        match self.arena.get(root)?.clone() {
            Operator::Sequence { children } => Ok(PlanEncoding::Sequence {
                plans: children
                    .into_iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>>>()?,
            }),
            Operator::Parallel { children } => {
                let mut fragments = Vec::new();
                for c in children {
                    match self.compile(c)? {
                        PlanEncoding::SubQuery { fragments: more } => fragments.extend(more),
                        _ => {
                            return Err(Error::unsupported(
                                "Parallel",
                                "branches must be plain sub-queries",
                            ))
                        }
                    }
                }
                Ok(PlanEncoding::SubQuery { fragments })
            }
            Operator::DoWhile { children } => self.compile_do_while(children),
            _ => self.compile_subquery(root),
        }
    }

    fn compile_do_while(&mut self, mut children: Vec<NodeId>) -> Result<PlanEncoding> {
        if children.len() < 2 {
            return Err(Error::MalformedDoWhile(format!(
                "needs a body and a condition, got {} plan(s)",
                children.len()
            )));
        }
        let last = children.len() - 1;
        let cond_root = children[last];
        let condition = match self.arena.get(cond_root)? {
            op if op.is_control() => {
                return Err(Error::MalformedDoWhile(format!(
                    "condition is a {}, not a relation-producing plan",
                    op.kind_name()
                )))
            }
            Operator::Store { relation, .. } if relation.is_temp() => relation.clone(),
            Operator::Store { relation, .. } => {
                return Err(Error::MalformedDoWhile(format!(
                    "condition stores into persistent relation {relation}; it must be a temporary"
                )))
            }
            Operator::StoreTemp { name, .. } => RelationKey::temp(name.clone()),
            _ => {
                let name = format!("__dowhile_{}_condition", self.loops);
                self.loops += 1;
                let stored = self.arena.add(Operator::StoreTemp {
                    input: cond_root,
                    name: name.clone(),
                });
                children[last] = stored;
                RelationKey::temp(name)
            }
        };
        let body = children
            .into_iter()
            .map(|c| self.compile(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(PlanEncoding::DoWhile { body, condition })
    }

    fn compile_subquery(&mut self, root: NodeId) -> Result<PlanEncoding> {
        let arena: &PlanArena = self.arena;
        let ids = &mut self.ids;
        let mut fragments = Vec::new();
        for nodes in extract_fragments(arena, root)? {
            let operators = nodes
                .into_iter()
                .map(|id| compile_operator(arena, id, ids))
                .collect::<Result<Vec<_>>>()?;

            #[cfg(feature = "tracing")]
            tracing::debug!(
                fragment = fragments.len(),
                operators = operators.len(),
                root = %operators.last().map(|o| o.op_name.as_str()).unwrap_or(""),
                "fragment compiled"
            );

            fragments.push(FragmentEncoding { operators });
        }
        Ok(PlanEncoding::SubQuery { fragments })
    }
}

/// Compile the physical plan under `root` with a fresh compiler.
pub fn compile_plan(arena: &mut PlanArena, root: NodeId) -> Result<PlanEncoding> {
    PlanCompiler::new(arena).compile(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardplan_core::algebra::{Exchange, ExchangeKind};
    use shardplan_core::expr::{col, eq};
    use shardplan_core::schema::{DataType, Field, Scheme};

    fn scan(arena: &mut PlanArena, name: &str) -> NodeId {
        arena.scan(
            RelationKey::new("public", "adhoc", name),
            Scheme::new(vec![Field::new(name.to_lowercase(), DataType::Int64)]),
        )
    }

    fn op_types(plan: &PlanEncoding) -> Vec<Vec<String>> {
        let PlanEncoding::SubQuery { fragments } = plan else {
            panic!("expected a sub-query");
        };
        fragments
            .iter()
            .map(|f| {
                f.operators
                    .iter()
                    .map(|o| serde_json::to_value(o).unwrap()["opType"].as_str().unwrap().to_string())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_single_fragment_postorder() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A");
        let b = scan(&mut arena, "B");
        let j = arena.join(a, b, eq(col(0), col(1)));
        let s = arena.store(j, RelationKey::new("public", "adhoc", "OUT"));

        assert_eq!(extract_fragments(&arena, s).unwrap(), vec![vec![a, b, j, s]]);
        let plan = compile_plan(&mut arena, s).unwrap();
        assert_eq!(
            op_types(&plan),
            vec![vec!["TableScan", "TableScan", "SymmetricHashJoin", "DbInsert"]]
        );
        let ids: Vec<u64> = plan.operators().iter().map(|o| o.op_id.get()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_consumers_split_fragments() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A");
        let p = arena.add(Operator::Producer {
            input: a,
            exchange: Exchange::Collect,
        });
        let c = arena.add(Operator::Consumer {
            producer: p,
            kind: ExchangeKind::Collect,
        });
        let d = arena.add(Operator::Distinct { input: c });

        assert_eq!(
            extract_fragments(&arena, d).unwrap(),
            vec![vec![c, d], vec![a, p]]
        );
        let plan = compile_plan(&mut arena, d).unwrap();
        assert_eq!(
            op_types(&plan),
            vec![
                vec!["CollectConsumer", "DupElim"],
                vec!["TableScan", "CollectProducer"]
            ]
        );
        let ops = plan.operators();
        let consumer = serde_json::to_value(ops[0]).unwrap();
        let producer = serde_json::to_value(ops[3]).unwrap();
        assert_eq!(consumer["argOperatorId"], producer["opId"]);
        let mut ids: Vec<u64> = ops.iter().map(|o| o.op_id.get()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_plain_root_is_one_subquery() {
        let mut arena = PlanArena::new();
        let s = arena.add(Operator::Singleton);
        let plan = compile_plan(&mut arena, s).unwrap();
        assert_eq!(plan.fragment_count(), 1);
    }

    #[test]
    fn test_parallel_flattens_and_sequence_nests() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A");
        let b = scan(&mut arena, "B");
        let sa = arena.add(Operator::StoreTemp {
            input: a,
            name: "x".into(),
        });
        let sb = arena.add(Operator::StoreTemp {
            input: b,
            name: "y".into(),
        });
        let par = arena.add(Operator::Parallel {
            children: vec![sa, sb],
        });
        let seq = arena.add(Operator::Sequence {
            children: vec![par, sa],
        });
        let plan = compile_plan(&mut arena, seq).unwrap();
        let PlanEncoding::Sequence { plans } = &plan else {
            panic!("expected a sequence");
        };
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].fragment_count(), 2);
        // The same node compiled twice keeps its id.
        assert_eq!(plans[1].operators()[0].op_id, plans[0].operators()[0].op_id);
    }

    #[test]
    fn test_do_while_wraps_condition() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A");
        let body = arena.add(Operator::StoreTemp {
            input: a,
            name: "acc".into(),
        });
        let cond = scan(&mut arena, "B");
        let looped = arena.add(Operator::DoWhile {
            children: vec![body, cond],
        });
        let plan = compile_plan(&mut arena, looped).unwrap();
        let PlanEncoding::DoWhile { body, condition } = &plan else {
            panic!("expected a loop");
        };
        assert_eq!(condition, &RelationKey::temp("__dowhile_0_condition"));
        assert_eq!(body.len(), 2);
        let last = serde_json::to_value(body[1].operators().last().unwrap()).unwrap();
        assert_eq!(last["opType"], "DbInsert");
        assert_eq!(last["relationKey"]["relationName"], "__dowhile_0_condition");
    }

    #[test]
    fn test_do_while_condition_must_be_temporary() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A");
        let body = arena.add(Operator::StoreTemp {
            input: a,
            name: "acc".into(),
        });
        let persistent = arena.store(a, RelationKey::new("alice", "prog", "changed"));
        let looped = arena.add(Operator::DoWhile {
            children: vec![body, persistent],
        });
        assert!(matches!(
            compile_plan(&mut arena, looped),
            Err(Error::MalformedDoWhile(_))
        ));

        let key = RelationKey::temp("changed");
        let temp = arena.store(a, key.clone());
        let looped = arena.add(Operator::DoWhile {
            children: vec![body, temp],
        });
        let PlanEncoding::DoWhile { condition, .. } = compile_plan(&mut arena, looped).unwrap() else {
            panic!("expected a loop");
        };
        assert!(condition.is_temp());
        assert_eq!(condition, key);
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["programName"], "__TEMP__");
    }

    #[test]
    fn test_malformed_do_while() {
        let mut arena = PlanArena::new();
        let a = scan(&mut arena, "A");
        let lonely = arena.add(Operator::DoWhile { children: vec![a] });
        assert!(matches!(
            compile_plan(&mut arena, lonely),
            Err(Error::MalformedDoWhile(_))
        ));

        let seq = arena.add(Operator::Sequence { children: vec![a] });
        let nested = arena.add(Operator::DoWhile {
            children: vec![a, seq],
        });
        assert!(matches!(
            compile_plan(&mut arena, nested),
            Err(Error::MalformedDoWhile(_))
        ));
    }
}
