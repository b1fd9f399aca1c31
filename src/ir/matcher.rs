//! Composable node predicates.
//!
//! Predicates are pure: they read the tree, its attributes and the type
//! oracle, never mutate anything, and are cheap to clone and share between
//! rules and threads.

use std::fmt;
use std::sync::Arc;

use super::attributes::{AttributeKey, AttributeValue};
use super::node::{NodeId, NodeKind, Syntax, Tree, normalize_class_name};
use super::types::TypeOracle;

/// What a predicate may look at.
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pub tree: &'a Tree,
    pub oracle: &'a dyn TypeOracle,
}

impl<'a> MatchContext<'a> {
    pub fn new(tree: &'a Tree, oracle: &'a dyn TypeOracle) -> Self {
        Self { tree, oracle }
    }
}

type PredicateFn = dyn Fn(&MatchContext<'_>, NodeId) -> bool + Send + Sync;

/// A boolean test over a node.
#[derive(Clone)]
pub struct Predicate(Arc<PredicateFn>);

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate")
    }
}

impl Predicate {
    pub fn new<F>(test: F) -> Self
    where
        F: Fn(&MatchContext<'_>, NodeId) -> bool + Send + Sync + 'static,
    {
        Predicate(Arc::new(test))
    }

    pub fn matches(&self, ctx: &MatchContext<'_>, node: NodeId) -> bool {
        (self.0)(ctx, node)
    }

    /// Short-circuit conjunction.
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::new(move |ctx, node| self.matches(ctx, node) && other.matches(ctx, node))
    }

    /// Short-circuit disjunction.
    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::new(move |ctx, node| self.matches(ctx, node) || other.matches(ctx, node))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        Predicate::new(move |ctx, node| !self.matches(ctx, node))
    }
}

pub fn any() -> Predicate {
    Predicate::new(|_, _| true)
}

pub fn kind(kind: NodeKind) -> Predicate {
    Predicate::new(move |ctx, node| ctx.tree.kind(node) == kind)
}

/// The node carries the given identifier (method, variable, class, ...).
pub fn named(name: &str) -> Predicate {
    let name = name.to_string();
    Predicate::new(move |ctx, node| ctx.tree.name(node) == Some(name.as_str()))
}

/// A method call whose name is one of `names`.
pub fn call_named(names: &[&str]) -> Predicate {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    Predicate::new(move |ctx, node| match ctx.tree.syntax(node) {
        Syntax::MethodCall { name } => names.iter().any(|n| n == name),
        _ => false,
    })
}

/// A static call on `class`.
pub fn static_call_on(class: &str) -> Predicate {
    let class = normalize_class_name(class).to_string();
    Predicate::new(move |ctx, node| match ctx.tree.syntax(node) {
        Syntax::StaticCall { class: target, .. } => normalize_class_name(target) == class,
        _ => false,
    })
}

/// An instantiation of exactly `class`.
pub fn new_of(class: &str) -> Predicate {
    let class = normalize_class_name(class).to_string();
    Predicate::new(move |ctx, node| match ctx.tree.syntax(node) {
        Syntax::New { class: target } => normalize_class_name(target) == class,
        _ => false,
    })
}

/// The node's resolved type is `class` or a subtype. Unknown never matches.
pub fn instance_of(class: &str) -> Predicate {
    let class = class.to_string();
    Predicate::new(move |ctx, node| ctx.oracle.is_instance_of(ctx.tree, node, &class))
}

/// A method call whose receiver is an instance of `class`.
pub fn receiver_instance_of(class: &str) -> Predicate {
    let class = class.to_string();
    Predicate::new(move |ctx, node| {
        ctx.tree.kind(node) == NodeKind::MethodCall
            && ctx
                .tree
                .child(node, 0)
                .is_some_and(|receiver| ctx.oracle.is_instance_of(ctx.tree, receiver, &class))
    })
}

/// The call's `index`-th argument exists and satisfies `inner`.
pub fn arg(index: usize, inner: Predicate) -> Predicate {
    Predicate::new(move |ctx, node| {
        call_args(ctx.tree, node)
            .get(index)
            .is_some_and(|a| inner.matches(ctx, *a))
    })
}

/// The node sits inside a class that is an instance of `class`.
pub fn enclosing_class_instance_of(class: &str) -> Predicate {
    let class = class.to_string();
    Predicate::new(move |ctx, node| {
        enclosing_class(ctx.tree, node)
            .is_some_and(|c| ctx.oracle.is_instance_of(ctx.tree, c, &class))
    })
}

pub fn has_attribute(key: AttributeKey) -> Predicate {
    Predicate::new(move |ctx, node| ctx.tree.has_attr(node, key))
}

/// Argument nodes of a call-like node; empty for anything else.
pub fn call_args(tree: &Tree, node: NodeId) -> &[NodeId] {
    let children = tree.children(node);
    match tree.kind(node) {
        NodeKind::MethodCall => children.get(1..).unwrap_or(&[]),
        NodeKind::StaticCall | NodeKind::FuncCall | NodeKind::New => children,
        _ => &[],
    }
}

/// Enclosing class declaration, from the decorator's attribute when it is
/// still valid, else by walking the ancestors.
pub fn enclosing_class(tree: &Tree, node: NodeId) -> Option<NodeId> {
    tree.attr(node, AttributeKey::EnclosingClass)
        .and_then(AttributeValue::as_node)
        .filter(|c| tree.is_live(*c) && tree.is_ancestor_or_self(*c, node) && *c != node)
        .or_else(|| tree.enclosing(node, NodeKind::Class))
}
