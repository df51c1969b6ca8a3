//! Rewrite rules and the engine that applies them.
//!
//! A rule inspects one node and returns the handle of its replacement (the
//! same handle when it does not apply). A *group* is an ordered list of rules
//! applied in a single bottom-up pass: children are rewritten first, then every
//! rule of the group is tried in turn on the node produced by the previous one.
//! Groups are never repeated by the engine; pipeline order lives in
//! `pipeline`.

use shardplan_core::algebra::PlanArena;
use shardplan_core::config::CompilerConfig;
use shardplan_core::error::Result;
use shardplan_core::id::NodeId;

use crate::catalog::Catalog;

/// Read-only state shared by every rule of a compilation.
pub struct RuleContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub config: &'a CompilerConfig,
}

pub trait Rule {
    fn name(&self) -> &'static str;

    fn fire(&self, arena: &mut PlanArena, id: NodeId, ctx: &RuleContext<'_>) -> Result<NodeId>;
}

pub struct RuleGroup {
    pub name: &'static str,
    pub rules: Vec<Box<dyn Rule>>,
}

impl RuleGroup {
    pub fn new(name: &'static str, rules: Vec<Box<dyn Rule>>) -> Self {
        Self { name, rules }
    }

    /// Rewrite the tree under `root`, returning the (possibly new) root.
    pub fn apply(&self, arena: &mut PlanArena, root: NodeId, ctx: &RuleContext<'_>) -> Result<NodeId> {
        let out = self.rewrite(arena, root, ctx)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(group = self.name, nodes = arena.len(), "rule group applied");

        Ok(out)
    }

    fn rewrite(&self, arena: &mut PlanArena, id: NodeId, ctx: &RuleContext<'_>) -> Result<NodeId> {
        for (slot, child) in arena.children(id)?.into_iter().enumerate() {
            let new_child = self.rewrite(arena, child, ctx)?;
            if new_child != child {
                arena.set_child(id, slot, new_child)?;
            }
        }
        let mut cur = id;
        for rule in &self.rules {
            cur = rule.fire(arena, cur, ctx)?;
        }
        Ok(cur)
    }
}
