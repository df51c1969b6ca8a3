//! JSON documents consumed by the worker processes.
//!
//! - `expr`: scalar expressions and emit lists
//! - `operator`: one record per physical operator, keyed by `opType`
//! - `plan`: fragments, control structures and the top-level query document

pub mod expr;
pub mod operator;
pub mod plan;

use std::collections::HashMap;

use shardplan_core::id::{NodeId, OpId};

pub use expr::{compile_emitters, compile_expr, EmitEncoding, ExprEncoding};
pub use operator::{compile_operator, OperatorBody, OperatorEncoding, PartitionFunction};
pub use plan::{FragmentEncoding, PlanEncoding, QueryEncoding};

/// Hands out wire ids in first-reference order, keyed by node handle.
///
/// One allocator spans a whole compilation so ids are unique across every
/// fragment and sub-plan of the emitted document.
#[derive(Debug, Default)]
pub struct OpIdAllocator {
    ids: HashMap<NodeId, OpId>,
    next: u64,
}

impl OpIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id of `node`, allocating the next one on first reference.
    pub fn id(&mut self, node: NodeId) -> OpId {
        if let Some(id) = self.ids.get(&node) {
            return *id;
        }
        let id = OpId::new(self.next);
        self.next += 1;
        self.ids.insert(node, id);
        id
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_first_reference() {
        let mut ids = OpIdAllocator::new();
        let a = NodeId::new(7);
        let b = NodeId::new(2);
        assert_eq!(ids.id(a).get(), 0);
        assert_eq!(ids.id(b).get(), 1);
        assert_eq!(ids.id(a).get(), 0);
        assert_eq!(ids.allocated(), 2);
    }
}
