//! Single-pass depth-first rule dispatch.
//!
//! Every attached node is offered to the rules that accept its kind, in rule
//! order: pre-order rules on entry, post-order rules on exit. When a dispatch
//! round changes a node in place, the node is offered to the rules again; a
//! node changed more than `revisit_bound` times by one visit order aborts the
//! tree-run with [`RewriteError::RuntimeLoopDetected`].
//!
//! A node introduced by a replacement or an expansion starts with a fresh
//! budget and is dispatched before the traversal moves past its slot. A slot
//! may be replaced at most `(revisit_bound + 1)` times the number of rules in
//! one pass.
//!
//! Children are walked by slot: whatever a rule put in place of a child is
//! what the traversal continues with, and a node moved somewhere else in the
//! tree is never visited twice in one pass.
//!
//! Each rule application runs under a tree checkpoint. An application that
//! fails with a recoverable error is rolled back and counts as unchanged.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use super::node::{NodeId, Tree};
use super::rule::{AddedFile, RewriteRule, RuleContext, RuleOutcome, VisitOrder};
use super::types::TypeOracle;
use crate::error::{Result, RewriteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    Pending,
    Visiting,
    Visited,
}

/// Counters for one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub visited: usize,
    pub mutations: usize,
    /// Rule applications rolled back after an `InvalidMutation`.
    pub recovered_errors: usize,
}

impl PassStats {
    pub fn changed(&self) -> bool {
        self.mutations > 0
    }
}

/// Where a dispatch round left the slot.
enum Slot {
    /// The slot holds this node (possibly a replacement).
    Node(NodeId),
    /// The slot was expanded into this many nodes, already visited.
    Expanded(usize),
    Removed,
}

pub struct Traversal<'r, 't> {
    rules: &'r [Arc<dyn RewriteRule>],
    tree: &'t mut Tree,
    oracle: &'t dyn TypeOracle,
    added_files: &'t mut Vec<AddedFile>,
    pass: u32,
    revisit_bound: u32,
    states: FxHashMap<NodeId, VisitState>,
    revisits: FxHashMap<(NodeId, VisitOrder), u32>,
    stats: PassStats,
}

impl<'r, 't> Traversal<'r, 't> {
    pub fn new(
        rules: &'r [Arc<dyn RewriteRule>],
        tree: &'t mut Tree,
        oracle: &'t dyn TypeOracle,
        added_files: &'t mut Vec<AddedFile>,
        pass: u32,
        revisit_bound: u32,
    ) -> Self {
        Self {
            rules,
            tree,
            oracle,
            added_files,
            pass,
            revisit_bound,
            states: FxHashMap::default(),
            revisits: FxHashMap::default(),
            stats: PassStats::default(),
        }
    }

    /// Visits the whole tree once.
    pub fn run(mut self) -> Result<PassStats> {
        let root = self.tree.root();
        self.visit(root, 0)?;
        debug!(
            "Pass {}: visited {} node(s), {} mutation(s), {} recovered error(s)",
            self.pass, self.stats.visited, self.stats.mutations, self.stats.recovered_errors
        );
        Ok(self.stats)
    }

    fn state(&self, node: NodeId) -> VisitState {
        self.states.get(&node).copied().unwrap_or(VisitState::Pending)
    }

    /// Longest allowed run of successive replacements of one slot.
    fn replacement_limit(&self) -> u32 {
        (self.rules.len() as u32).max(1) * (self.revisit_bound + 1)
    }

    /// Visits `node` and its subtree. `lineage` counts the replacements that
    /// led to `node` occupying its slot. Returns how many nodes now occupy the slot.
    fn visit(&mut self, node: NodeId, lineage: u32) -> Result<usize> {
        if self.state(node) != VisitState::Pending || !self.tree.is_live(node) {
            return Ok(1);
        }
        self.states.insert(node, VisitState::Visiting);
        self.stats.visited += 1;
        trace!("Visiting {} ({})", node, self.tree.kind(node));

        let current = match self.dispatch_rounds(node, VisitOrder::PreOrder, lineage)? {
            Slot::Node(current) => current,
            Slot::Expanded(count) => {
                self.states.insert(node, VisitState::Visited);
                return Ok(count);
            }
            Slot::Removed => {
                self.states.insert(node, VisitState::Visited);
                return Ok(0);
            }
        };
        self.states.insert(current, VisitState::Visiting);

        let mut index = 0;
        while let Some(child) = self.tree.child(current, index) {
            if self.tree.parent(child) != Some(current) {
                return Err(RewriteError::InvariantViolation(format!(
                    "{} is listed under {} but its parent is {:?}",
                    child,
                    current,
                    self.tree.parent(child)
                )));
            }
            index += self.visit(child, 0)?;
        }

        let occupied = match self.dispatch_rounds(current, VisitOrder::PostOrder, lineage)? {
            Slot::Node(_) => 1,
            Slot::Expanded(count) => count,
            Slot::Removed => 0,
        };
        self.states.insert(node, VisitState::Visited);
        self.states.insert(current, VisitState::Visited);
        Ok(occupied)
    }

    /// Offers the slot's node to the rules of one visit order until a round leaves it unchanged.
    fn dispatch_rounds(&mut self, node: NodeId, order: VisitOrder, mut lineage: u32) -> Result<Slot> {
        let rules = self.rules;
        let mut current = node;
        loop {
            let round_start = current;
            let mut last_change: Option<&'static str> = None;
            for rule in rules.iter().filter(|r| r.visit_order() == order) {
                if !rule.accepted_kinds().contains(&self.tree.kind(current)) {
                    continue;
                }
                match self.dispatch(rule.as_ref(), current)? {
                    RuleOutcome::Unchanged => {}
                    RuleOutcome::Mutated => last_change = Some(rule.id()),
                    RuleOutcome::Replaced(new) => {
                        lineage += 1;
                        self.check_lineage(current, rule.id(), lineage)?;
                        self.states.insert(current, VisitState::Visited);
                        self.states.insert(new, VisitState::Visiting);
                        current = new;
                        last_change = Some(rule.id());
                    }
                    RuleOutcome::Expanded(nodes) => {
                        lineage += 1;
                        self.check_lineage(current, rule.id(), lineage)?;
                        self.states.insert(current, VisitState::Visited);
                        let mut count = 0;
                        for n in nodes {
                            count += self.visit(n, lineage)?;
                        }
                        return Ok(Slot::Expanded(count));
                    }
                    RuleOutcome::Removed => {
                        self.finish_removal(current, rule.id())?;
                        return Ok(Slot::Removed);
                    }
                }
            }
            let Some(rule) = last_change else {
                return Ok(Slot::Node(current));
            };
            if current == round_start {
                let count = self.revisits.entry((current, order)).or_insert(0);
                *count += 1;
                let count = *count;
                self.check_bound(current, rule, count)?;
                trace!("Re-visiting {} after '{}' ({} of {})", current, rule, count, self.revisit_bound);
            } else {
                trace!("Visiting replacement {} after '{}'", current, rule);
            }
        }
    }

    fn check_bound(&self, node: NodeId, rule: &str, revisits: u32) -> Result<()> {
        if revisits > self.revisit_bound {
            return Err(RewriteError::RuntimeLoopDetected {
                node,
                rule: rule.to_string(),
                bound: self.revisit_bound,
            });
        }
        Ok(())
    }

    fn check_lineage(&self, node: NodeId, rule: &str, lineage: u32) -> Result<()> {
        if lineage > self.replacement_limit() {
            return Err(RewriteError::RuntimeLoopDetected {
                node,
                rule: rule.to_string(),
                bound: self.revisit_bound,
            });
        }
        Ok(())
    }

    /// Detaches and discards a node a rule reported as removed, unless the
    /// rule already did. The root cannot be removed.
    fn finish_removal(&mut self, node: NodeId, rule: &str) -> Result<()> {
        if !self.tree.is_live(node) {
            return Ok(());
        }
        if node == self.tree.root() {
            return Err(RewriteError::InvariantViolation(format!(
                "rule '{}' reported the removal of root {}",
                rule, node
            )));
        }
        self.tree.remove(node)?;
        trace!("Removed {} on behalf of '{}'", node, rule);
        Ok(())
    }

    /// Applies one rule to one node, rolling back recoverable failures.
    fn dispatch(&mut self, rule: &dyn RewriteRule, node: NodeId) -> Result<RuleOutcome> {
        let before = self.tree.revision();
        let files_before = self.added_files.len();
        self.tree.checkpoint();
        let result = {
            let mut ctx = RuleContext::new(self.tree, self.oracle, self.added_files, self.pass);
            rule.apply(node, &mut ctx)
        };
        let outcome = match result {
            Ok(outcome) => {
                self.tree.commit();
                outcome
            }
            Err(err) if !err.is_fatal() => {
                self.tree.rollback();
                self.added_files.truncate(files_before);
                warn!("Rule '{}' abandoned on {}: {}", rule.id(), node, err);
                self.stats.recovered_errors += 1;
                return Ok(RuleOutcome::Unchanged);
            }
            Err(err) => {
                self.tree.commit();
                return Err(err);
            }
        };

        let outcome = match outcome {
            RuleOutcome::Unchanged if self.tree.revision() != before => RuleOutcome::Mutated,
            RuleOutcome::Replaced(new) if !self.tree.is_attached(new) => {
                return Err(RewriteError::InvariantViolation(format!(
                    "rule '{}' reported replacement {} for {} but it is not attached",
                    rule.id(),
                    new,
                    node
                )));
            }
            RuleOutcome::Expanded(nodes) => {
                if let Some(stray) = nodes.iter().find(|n| !self.tree.is_attached(**n)) {
                    return Err(RewriteError::InvariantViolation(format!(
                        "rule '{}' expanded {} into {} but it is not attached",
                        rule.id(),
                        node,
                        stray
                    )));
                }
                RuleOutcome::Expanded(nodes)
            }
            other => other,
        };
        if outcome.is_change() {
            self.stats.mutations += 1;
            trace!("Rule '{}' changed {}: {:?}", rule.id(), node, outcome);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::{NodeKind, Syntax};
    use crate::ir::types::UnknownTypeOracle;

    /// Renames `foo` calls to `bar`, once.
    struct Rename;

    impl RewriteRule for Rename {
        fn id(&self) -> &'static str {
            "rename"
        }

        fn accepted_kinds(&self) -> &'static [NodeKind] {
            &[NodeKind::MethodCall]
        }

        fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
            if ctx.tree().name(node) != Some("foo") {
                return Ok(RuleOutcome::Unchanged);
            }
            *ctx.tree_mut().syntax_mut(node) = Syntax::method_call("bar");
            Ok(RuleOutcome::Mutated)
        }
    }

    /// Toggles between `foo` and `bar` forever.
    struct Flip;

    impl RewriteRule for Flip {
        fn id(&self) -> &'static str {
            "flip"
        }

        fn accepted_kinds(&self) -> &'static [NodeKind] {
            &[NodeKind::MethodCall]
        }

        fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
            let next = if ctx.tree().name(node) == Some("foo") { "bar" } else { "foo" };
            *ctx.tree_mut().syntax_mut(node) = Syntax::method_call(next);
            Ok(RuleOutcome::Mutated)
        }
    }

    /// Tries to detach a node that is not a child.
    struct Broken;

    impl RewriteRule for Broken {
        fn id(&self) -> &'static str {
            "broken"
        }

        fn accepted_kinds(&self) -> &'static [NodeKind] {
            &[NodeKind::Variable]
        }

        fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
            let root = ctx.tree().root();
            ctx.tree_mut().detach(root, node)?;
            Ok(RuleOutcome::Mutated)
        }
    }

    fn tree() -> (Tree, NodeId) {
        let mut tree = Tree::new(Syntax::File);
        let receiver = tree.add(Syntax::variable("x"));
        let call = tree.add_with_children(Syntax::method_call("foo"), vec![receiver]).unwrap();
        let stmt = tree.add_with_children(Syntax::Expression, vec![call]).unwrap();
        let root = tree.root();
        tree.push_child(root, stmt).unwrap();
        (tree, call)
    }

    fn run(rules: &[Arc<dyn RewriteRule>], tree: &mut Tree, bound: u32) -> Result<PassStats> {
        let mut files = Vec::new();
        Traversal::new(rules, tree, &UnknownTypeOracle, &mut files, 1, bound).run()
    }

    #[test]
    fn test_rewrite_settles_within_bound() {
        let (mut tree, call) = tree();
        let rules: Vec<Arc<dyn RewriteRule>> = vec![Arc::new(Rename)];
        let stats = run(&rules, &mut tree, 1).unwrap();
        assert_eq!(tree.name(call), Some("bar"));
        assert_eq!(stats.mutations, 1);
        assert_eq!(stats.visited, 4);
    }

    #[test]
    fn test_endless_rewrite_is_detected() {
        let (mut tree, call) = tree();
        let rules: Vec<Arc<dyn RewriteRule>> = vec![Arc::new(Flip)];
        let err = run(&rules, &mut tree, 3).unwrap_err();
        assert_eq!(
            err,
            RewriteError::RuntimeLoopDetected {
                node: call,
                rule: "flip".to_string(),
                bound: 3
            }
        );
    }

    #[test]
    fn test_invalid_mutation_is_recovered() {
        let (mut tree, _) = tree();
        let rules: Vec<Arc<dyn RewriteRule>> = vec![Arc::new(Broken), Arc::new(Rename)];
        let stats = run(&rules, &mut tree, 1).unwrap();
        assert_eq!(stats.recovered_errors, 1);
        assert_eq!(stats.mutations, 1);
        assert!(tree.validate().is_ok());
    }

    /// Renames `foo` to `half`, then fails on a stale detach.
    struct HalfApplied;

    impl RewriteRule for HalfApplied {
        fn id(&self) -> &'static str {
            "half_applied"
        }

        fn accepted_kinds(&self) -> &'static [NodeKind] {
            &[NodeKind::MethodCall]
        }

        fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
            *ctx.tree_mut().syntax_mut(node) = Syntax::method_call("half");
            let root = ctx.tree().root();
            ctx.tree_mut().detach(root, node)?;
            Ok(RuleOutcome::Mutated)
        }
    }

    /// Reports statements holding a `foo` call as removed without detaching them.
    struct DropFooStatements;

    impl RewriteRule for DropFooStatements {
        fn id(&self) -> &'static str {
            "drop_foo_statements"
        }

        fn accepted_kinds(&self) -> &'static [NodeKind] {
            &[NodeKind::Expression, NodeKind::File]
        }

        fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
            let tree = ctx.tree();
            if tree.kind(node) == NodeKind::File {
                return Ok(if tree.children(node).is_empty() {
                    RuleOutcome::Removed
                } else {
                    RuleOutcome::Unchanged
                });
            }
            let holds_foo = tree.child(node, 0).is_some_and(|c| tree.name(c) == Some("foo"));
            Ok(if holds_foo { RuleOutcome::Removed } else { RuleOutcome::Unchanged })
        }
    }

    /// Swaps `new Foo` for a fresh `new Bar`.
    struct ReplaceFoo;

    impl RewriteRule for ReplaceFoo {
        fn id(&self) -> &'static str {
            "replace_foo"
        }

        fn accepted_kinds(&self) -> &'static [NodeKind] {
            &[NodeKind::New]
        }

        fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
            if ctx.tree().syntax(node) != &(Syntax::New { class: "Foo".into() }) {
                return Ok(RuleOutcome::Unchanged);
            }
            let tree = ctx.tree_mut();
            let bar = tree.add(Syntax::New { class: "Bar".into() });
            tree.replace(node, bar)?;
            Ok(RuleOutcome::Replaced(bar))
        }
    }

    /// Renames `new Bar` to `new Baz` in place.
    struct BarToBaz;

    impl RewriteRule for BarToBaz {
        fn id(&self) -> &'static str {
            "bar_to_baz"
        }

        fn accepted_kinds(&self) -> &'static [NodeKind] {
            &[NodeKind::New]
        }

        fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
            if ctx.tree().syntax(node) != &(Syntax::New { class: "Bar".into() }) {
                return Ok(RuleOutcome::Unchanged);
            }
            *ctx.tree_mut().syntax_mut(node) = Syntax::New { class: "Baz".into() };
            Ok(RuleOutcome::Mutated)
        }
    }

    /// Splits a `pair` statement into two `foo` statements.
    struct SplitPair;

    impl RewriteRule for SplitPair {
        fn id(&self) -> &'static str {
            "split_pair"
        }

        fn accepted_kinds(&self) -> &'static [NodeKind] {
            &[NodeKind::Expression]
        }

        fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
            let tree = ctx.tree_mut();
            if !tree.child(node, 0).is_some_and(|c| tree.name(c) == Some("pair")) {
                return Ok(RuleOutcome::Unchanged);
            }
            let mut statements = Vec::new();
            for _ in 0..2 {
                let receiver = tree.add(Syntax::variable("x"));
                let call = tree.add_with_children(Syntax::method_call("foo"), vec![receiver])?;
                statements.push(tree.add_with_children(Syntax::Expression, vec![call])?);
            }
            tree.replace_with_many(node, &statements)?;
            Ok(RuleOutcome::Expanded(statements))
        }
    }

    fn statement(tree: &mut Tree, syntax: Syntax) -> NodeId {
        let node = tree.add(syntax);
        let stmt = tree.add_with_children(Syntax::Expression, vec![node]).unwrap();
        let root = tree.root();
        tree.push_child(root, stmt).unwrap();
        node
    }

    #[test]
    fn test_abandoned_application_is_rolled_back() {
        let (mut tree, call) = tree();
        let revision = tree.revision();
        let rules: Vec<Arc<dyn RewriteRule>> = vec![Arc::new(HalfApplied)];
        let stats = run(&rules, &mut tree, 1).unwrap();
        assert_eq!(tree.name(call), Some("foo"));
        assert_eq!(stats.recovered_errors, 1);
        assert_eq!(stats.mutations, 0);
        assert_eq!(tree.revision(), revision);
    }

    #[test]
    fn test_removed_statements_are_detached() {
        let mut tree = Tree::new(Syntax::File);
        statement(&mut tree, Syntax::method_call("foo"));
        statement(&mut tree, Syntax::method_call("foo"));
        let kept = statement(&mut tree, Syntax::method_call("bar"));
        let rules: Vec<Arc<dyn RewriteRule>> = vec![Arc::new(DropFooStatements)];
        let stats = run(&rules, &mut tree, 1).unwrap();

        assert_eq!(stats.mutations, 2);
        assert_eq!(tree.children(tree.root()).len(), 1);
        assert_eq!(tree.parent(kept), tree.child(tree.root(), 0));
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_removing_the_root_is_rejected() {
        let mut tree = Tree::new(Syntax::File);
        let rules: Vec<Arc<dyn RewriteRule>> = vec![Arc::new(DropFooStatements)];
        let err = run(&rules, &mut tree, 1).unwrap_err();
        assert!(matches!(err, RewriteError::InvariantViolation(_)));
    }

    #[test]
    fn test_replacement_has_its_own_revisit_budget() {
        let mut tree = Tree::new(Syntax::File);
        let foo = statement(&mut tree, Syntax::New { class: "Foo".into() });
        let stmt = tree.parent(foo).unwrap();
        let rules: Vec<Arc<dyn RewriteRule>> = vec![Arc::new(BarToBaz), Arc::new(ReplaceFoo)];
        let stats = run(&rules, &mut tree, 1).unwrap();

        let new = tree.child(stmt, 0).unwrap();
        assert_eq!(tree.syntax(new), &Syntax::New { class: "Baz".into() });
        assert!(!tree.is_live(foo));
        assert_eq!(stats.mutations, 2);
    }

    #[test]
    fn test_expansion_is_visited_in_the_same_pass() {
        let mut tree = Tree::new(Syntax::File);
        statement(&mut tree, Syntax::method_call("pair"));
        let rules: Vec<Arc<dyn RewriteRule>> = vec![Arc::new(SplitPair), Arc::new(Rename)];
        run(&rules, &mut tree, 1).unwrap();

        let names: Vec<Option<&str>> = tree
            .children(tree.root())
            .iter()
            .map(|s| tree.child(*s, 0).and_then(|c| tree.name(c)))
            .collect();
        assert_eq!(names, vec![Some("bar"), Some("bar")]);
    }
}
