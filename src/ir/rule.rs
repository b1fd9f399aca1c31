//! Rewrite rule contract.

use std::path::PathBuf;

use super::matcher::{MatchContext, Predicate};
use super::node::{NodeId, NodeKind, Tree};
use super::types::{ResolvedType, TypeOracle};
use crate::error::Result;

/// When a rule fires relative to the node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VisitOrder {
    /// On entry, before the children are visited.
    #[default]
    PreOrder,
    /// On exit, after the children have been visited.
    PostOrder,
}

/// What a rule application did to the node it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Unchanged,
    /// The node was modified in place (payload, children or attributes).
    Mutated,
    /// The node was replaced by the given node at the same position.
    Replaced(NodeId),
    /// The node was replaced by a sequence of nodes.
    Expanded(Vec<NodeId>),
    /// The node was removed from its parent.
    Removed,
}

impl RuleOutcome {
    pub fn is_change(&self) -> bool {
        !matches!(self, RuleOutcome::Unchanged)
    }
}

/// A file produced by a rule next to the rewritten tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedFile {
    pub path: PathBuf,
    pub content: String,
}

/// Everything a rule may touch while it runs.
pub struct RuleContext<'a> {
    tree: &'a mut Tree,
    oracle: &'a dyn TypeOracle,
    added_files: &'a mut Vec<AddedFile>,
    pass: u32,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        tree: &'a mut Tree,
        oracle: &'a dyn TypeOracle,
        added_files: &'a mut Vec<AddedFile>,
        pass: u32,
    ) -> Self {
        Self {
            tree,
            oracle,
            added_files,
            pass,
        }
    }

    pub fn tree(&self) -> &Tree {
        self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        self.tree
    }

    pub fn oracle(&self) -> &dyn TypeOracle {
        self.oracle
    }

    /// One-based number of the current pass.
    pub fn pass(&self) -> u32 {
        self.pass
    }

    pub fn matches(&self, predicate: &Predicate, node: NodeId) -> bool {
        predicate.matches(&MatchContext::new(self.tree, self.oracle), node)
    }

    pub fn resolved_type_of(&self, node: NodeId) -> ResolvedType {
        self.oracle.resolved_type_of(self.tree, node)
    }

    pub fn is_instance_of(&self, node: NodeId, class: &str) -> bool {
        self.oracle.is_instance_of(self.tree, node, class)
    }

    /// Records a new file to emit after the run.
    pub fn add_file(&mut self, file: AddedFile) {
        self.added_files.push(file);
    }
}

/// A self-describing rewrite rule.
///
/// Rules are stateless with respect to any single tree: everything they learn
/// about a node lives in the tree's attributes, so one rule value can serve
/// many trees concurrently.
pub trait RewriteRule: Send + Sync {
    /// Unique, stable identifier.
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    /// Node kinds the rule wants to be offered.
    fn accepted_kinds(&self) -> &'static [NodeKind];

    fn visit_order(&self) -> VisitOrder {
        VisitOrder::PreOrder
    }

    /// Rules that must be dispatched before this one on the same node.
    fn run_after(&self) -> &'static [&'static str] {
        &[]
    }

    /// Inspects `node` and rewrites it if it matches.
    ///
    /// Must be idempotent: applied to its own output it reports `Unchanged`.
    fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome>;
}
