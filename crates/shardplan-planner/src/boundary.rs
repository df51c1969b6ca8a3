//! Splitting logical exchanges into producer/consumer pairs.

use shardplan_core::algebra::{Operator, PlanArena};
use shardplan_core::error::Result;
use shardplan_core::id::NodeId;

use crate::rules::{Rule, RuleContext};

/// `Exchange(input)` becomes `Consumer -> Producer(input)`. The consumer keeps
/// the exchange's handle, so parents need no update; the producer becomes the
/// root of an upstream fragment.
pub struct BreakCommunication;

impl Rule for BreakCommunication {
    fn name(&self) -> &'static str {
        "Shuffle/Collect/Broadcast/HyperCubeShuffle => Producer, Consumer"
    }

    fn fire(&self, arena: &mut PlanArena, id: NodeId, _ctx: &RuleContext<'_>) -> Result<NodeId> {
        let Operator::Exchange { input, exchange } = arena.get(id)?.clone() else {
            return Ok(id);
        };
        let kind = exchange.kind();
        let producer = arena.add(Operator::Producer { input, exchange });
        arena.replace(id, Operator::Consumer { producer, kind })?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FakeCatalog;
    use crate::rules::RuleGroup;
    use shardplan_core::algebra::{Exchange, ExchangeKind};
    use shardplan_core::config::CompilerConfig;
    use shardplan_core::relation::RelationKey;
    use shardplan_core::schema::{DataType, Field, Scheme};

    #[test]
    fn test_every_exchange_is_broken() {
        let mut arena = PlanArena::new();
        let a = arena.scan(
            RelationKey::temp("A"),
            Scheme::new(vec![Field::new("x", DataType::Int32)]),
        );
        let shuffled = arena.exchange(a, Exchange::Shuffle { columns: vec![0] });
        let distinct = arena.add(Operator::Distinct { input: shuffled });
        let collected = arena.exchange(distinct, Exchange::Collect);

        let catalog = FakeCatalog::new(1);
        let config = CompilerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let root = RuleGroup::new("break", vec![Box::new(BreakCommunication)])
            .apply(&mut arena, collected, &ctx)
            .unwrap();

        assert_eq!(root, collected);
        assert_eq!(
            arena.render(root).unwrap(),
            "CollectConsumer\n  CollectProducer\n    Distinct\n      ShuffleConsumer\n        ShuffleProducer(h($0))\n          Scan(public:__TEMP__:A)\n"
        );
        match arena.get(shuffled).unwrap() {
            Operator::Consumer { kind, .. } => assert_eq!(*kind, ExchangeKind::Shuffle),
            other => panic!("expected consumer, got {other:?}"),
        }
        assert_eq!(arena.scheme(root).unwrap().names(), vec!["x"]);
    }
}
