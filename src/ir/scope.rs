//! Lexical scopes attached to nodes by the decorator.
//!
//! A scope chain answers which namespace, class and function a node sits in.

use std::fmt;
use std::sync::Arc;

/// Kind of lexical region a [`Scope`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    File,
    Namespace,
    Class,
    Function,
}

/// A lexical scope with parent chaining.
///
/// Scopes are created by the decorator, shared through `Arc` and referenced
/// from nodes via the `Scope` attribute; nodes never own them.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: Option<Arc<str>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    /// Creates the file-level scope.
    pub fn file() -> Arc<Self> {
        Arc::new(Scope {
            kind: ScopeKind::File,
            name: None,
            parent: None,
        })
    }

    /// Opens a nested scope below `parent`.
    pub fn nested(parent: &Arc<Scope>, kind: ScopeKind, name: &str) -> Arc<Self> {
        Arc::new(Scope {
            kind,
            name: Some(Arc::from(name)),
            parent: Some(Arc::clone(parent)),
        })
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// Looks up the nearest enclosing scope of a kind, starting with this one.
    pub fn lookup(&self, kind: ScopeKind) -> Option<&Scope> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if scope.kind == kind {
                return Some(scope);
            }
            current = scope.parent.as_deref();
        }
        None
    }

    pub fn namespace(&self) -> Option<&str> {
        self.lookup(ScopeKind::Namespace).and_then(|s| s.name.as_deref())
    }

    pub fn class_name(&self) -> Option<&str> {
        self.lookup(ScopeKind::Class).and_then(|s| s.name.as_deref())
    }

    pub fn function_name(&self) -> Option<&str> {
        self.lookup(ScopeKind::Function).and_then(|s| s.name.as_deref())
    }

    /// Fully-qualified name of the enclosing class, if any.
    pub fn qualified_class_name(&self) -> Option<String> {
        let class = self.class_name()?;
        Some(match self.namespace() {
            Some(ns) if !ns.is_empty() => format!("{}\\{}", ns, class),
            _ => class.to_string(),
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{}/", parent)?;
        }
        match &self.name {
            Some(name) => write!(f, "{:?}({})", self.kind, name),
            None => write!(f, "{:?}", self.kind),
        }
    }
}
