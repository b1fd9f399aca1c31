//! Decoration pre-pass.
//!
//! Runs before every rewrite pass and annotates the tree with the semantic
//! attributes rules and predicates read: the lexical [`Scope`], the enclosing
//! class and the resolved type of expression nodes.
//!
//! Structural attributes are recomputed on every run since rules may move
//! nodes. Resolved types are only filled in where missing: a type recorded
//! before a rewrite stays valid for the variables that were typed from the
//! rewritten expression.

use std::sync::Arc;

use tracing::debug;

use super::attributes::{AttributeKey, AttributeValue};
use super::node::{NodeId, NodeKind, Syntax, Tree};
use super::scope::{Scope, ScopeKind};
use super::types::{ResolvedType, TypeDescriptor, TypeOracle};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecorationStats {
    pub scoped: usize,
    pub typed: usize,
}

/// Whether the decorator caches a resolved type for this kind.
fn is_typed_kind(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Variable
            | NodeKind::New
            | NodeKind::MethodCall
            | NodeKind::StaticCall
            | NodeKind::Assign
            | NodeKind::Class
    )
}

/// Scope opened by a node for its children, if any.
fn opened_scope(syntax: &Syntax, parent: &Arc<Scope>) -> Option<Arc<Scope>> {
    match syntax {
        Syntax::Namespace { name } => Some(Scope::nested(parent, ScopeKind::Namespace, name)),
        Syntax::Class { name, .. } => Some(Scope::nested(parent, ScopeKind::Class, name)),
        Syntax::ClassMethod { name } | Syntax::Function { name } => {
            Some(Scope::nested(parent, ScopeKind::Function, name))
        }
        _ => None,
    }
}

/// Annotates every node reachable from the root.
pub fn decorate(tree: &mut Tree, oracle: &dyn TypeOracle) -> DecorationStats {
    let mut scopes: Vec<(NodeId, Arc<Scope>, Option<NodeId>)> = Vec::new();
    let mut types: Vec<(NodeId, Arc<TypeDescriptor>)> = Vec::new();

    let mut stack = vec![(tree.root(), Scope::file(), None::<NodeId>)];
    while let Some((id, scope, class)) = stack.pop() {
        if is_typed_kind(tree.kind(id)) && !tree.has_attr(id, AttributeKey::ResolvedType) {
            if let ResolvedType::Known(ty) = oracle.resolved_type_of(tree, id) {
                types.push((id, ty));
            }
        }

        let inner = opened_scope(tree.syntax(id), &scope).unwrap_or_else(|| Arc::clone(&scope));
        let inner_class = if tree.kind(id) == NodeKind::Class {
            Some(id)
        } else {
            class
        };
        for &child in tree.children(id).iter().rev() {
            stack.push((child, Arc::clone(&inner), inner_class));
        }
        scopes.push((id, scope, class));
    }

    let stats = DecorationStats {
        scoped: scopes.len(),
        typed: types.len(),
    };
    for (id, scope, class) in scopes {
        tree.set_attr(id, AttributeKey::Scope, AttributeValue::Scope(scope));
        match class {
            Some(class) => tree.set_attr(id, AttributeKey::EnclosingClass, AttributeValue::Node(class)),
            None => {
                tree.attributes_mut().remove(id, AttributeKey::EnclosingClass);
            }
        }
    }
    for (id, ty) in types {
        tree.set_attr(id, AttributeKey::ResolvedType, AttributeValue::Type(ty));
    }
    debug!("Decorated {} node(s), cached {} type(s)", stats.scoped, stats.typed);
    stats
}
