//! Arena-backed syntax tree with parent links and in-place mutation.
//!
//! The [`Tree`] owns every node. Nodes refer to each other through [`NodeId`]
//! handles: children are an ordered `Vec<NodeId>`, the parent is a lookup-only
//! back reference. A node's identity never changes; its content (syntax payload
//! and child list) may be rewritten by rules.
//!
//! Structural invariants maintained by every mutating operation:
//! - every attached node except the root has exactly one parent;
//! - a node appears exactly once among its parent's children;
//! - a node being attached must be free (no parent, not the root) and must not
//!   be an ancestor of its new parent.
//!
//! Removing or replacing a node discards its whole subtree and purges any
//! attributes that belong to, or point at, the discarded nodes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::attributes::{AttributeKey, AttributeStore, AttributeValue};
use crate::error::{Result, RewriteError};

/// Stable handle of a node inside one [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminant of a node's syntactic construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    File,
    Namespace,
    Class,
    ClassMethod,
    Function,
    Expression,
    Return,
    Assign,
    Variable,
    New,
    MethodCall,
    StaticCall,
    FuncCall,
    PropertyFetch,
    ClassConstFetch,
    Array,
    ArrayItem,
    String,
    Int,
    Bool,
    Null,
    Annotation,
    Opaque,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Syntax payload of a node. Child layout per variant:
///
/// | variant        | children                         |
/// |----------------|----------------------------------|
/// | `Expression`   | `[expr]`                         |
/// | `Return`       | `[]` or `[expr]`                 |
/// | `Assign`       | `[target, value]`                |
/// | `New`          | constructor arguments            |
/// | `MethodCall`   | `[receiver, args...]`            |
/// | `StaticCall`   | arguments                        |
/// | `FuncCall`     | arguments                        |
/// | `PropertyFetch`| `[receiver]`                     |
/// | `Array`        | `ArrayItem`s                     |
/// | `ArrayItem`    | `[key, value]` if keyed, else `[value]` |
/// | `Annotation`   | annotation arguments             |
///
/// Class names are fully qualified, without a leading backslash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Syntax {
    File,
    Namespace {
        name: String,
    },
    Class {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extends: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        implements: Vec<String>,
    },
    ClassMethod {
        name: String,
    },
    Function {
        name: String,
    },
    Expression,
    Return,
    Assign,
    Variable {
        name: String,
    },
    New {
        class: String,
    },
    MethodCall {
        name: String,
    },
    StaticCall {
        class: String,
        name: String,
    },
    FuncCall {
        name: String,
    },
    PropertyFetch {
        name: String,
    },
    ClassConstFetch {
        class: String,
        constant: String,
    },
    Array,
    ArrayItem {
        #[serde(default)]
        keyed: bool,
    },
    String {
        value: String,
    },
    Int {
        value: i64,
    },
    Bool {
        value: bool,
    },
    Null,
    Annotation {
        name: String,
    },
    /// Construct the engine does not model; kept verbatim for the printer.
    Opaque {
        label: String,
    },
}

impl Syntax {
    pub fn kind(&self) -> NodeKind {
        match self {
            Syntax::File => NodeKind::File,
            Syntax::Namespace { .. } => NodeKind::Namespace,
            Syntax::Class { .. } => NodeKind::Class,
            Syntax::ClassMethod { .. } => NodeKind::ClassMethod,
            Syntax::Function { .. } => NodeKind::Function,
            Syntax::Expression => NodeKind::Expression,
            Syntax::Return => NodeKind::Return,
            Syntax::Assign => NodeKind::Assign,
            Syntax::Variable { .. } => NodeKind::Variable,
            Syntax::New { .. } => NodeKind::New,
            Syntax::MethodCall { .. } => NodeKind::MethodCall,
            Syntax::StaticCall { .. } => NodeKind::StaticCall,
            Syntax::FuncCall { .. } => NodeKind::FuncCall,
            Syntax::PropertyFetch { .. } => NodeKind::PropertyFetch,
            Syntax::ClassConstFetch { .. } => NodeKind::ClassConstFetch,
            Syntax::Array => NodeKind::Array,
            Syntax::ArrayItem { .. } => NodeKind::ArrayItem,
            Syntax::String { .. } => NodeKind::String,
            Syntax::Int { .. } => NodeKind::Int,
            Syntax::Bool { .. } => NodeKind::Bool,
            Syntax::Null => NodeKind::Null,
            Syntax::Annotation { .. } => NodeKind::Annotation,
            Syntax::Opaque { .. } => NodeKind::Opaque,
        }
    }

    /// Identifier carried by the construct (method name, variable name, class name, ...).
    pub fn name(&self) -> Option<&str> {
        match self {
            Syntax::Namespace { name }
            | Syntax::Class { name, .. }
            | Syntax::ClassMethod { name }
            | Syntax::Function { name }
            | Syntax::Variable { name }
            | Syntax::MethodCall { name }
            | Syntax::StaticCall { name, .. }
            | Syntax::FuncCall { name }
            | Syntax::PropertyFetch { name }
            | Syntax::Annotation { name } => Some(name),
            Syntax::New { class } => Some(class),
            Syntax::ClassConstFetch { constant, .. } => Some(constant),
            _ => None,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Syntax::String { value: value.into() }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Syntax::Variable { name: name.into() }
    }

    pub fn method_call(name: impl Into<String>) -> Self {
        Syntax::MethodCall { name: name.into() }
    }

    pub fn class_const(class: impl Into<String>, constant: impl Into<String>) -> Self {
        Syntax::ClassConstFetch {
            class: class.into(),
            constant: constant.into(),
        }
    }
}

/// Strips the leading namespace separator so names compare by exact string.
pub fn normalize_class_name(name: &str) -> &str {
    name.trim_start_matches('\\')
}

#[derive(Debug, Clone)]
struct Node {
    syntax: Syntax,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    live: bool,
}

/// Where the tree came from; handed over by the external parser.
#[derive(Debug, Clone, Default)]
pub struct SourceOrigin {
    pub path: Option<PathBuf>,
    pub source: Option<Arc<str>>,
}

/// A syntax tree plus its attribute side-channel.
///
/// The attribute store lives inside the tree, so attributes can never leak
/// between independent tree-runs.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    attributes: AttributeStore,
    origin: SourceOrigin,
    revision: u64,
    checkpoint: Option<Checkpoint>,
}

/// State needed to undo every change made after [`Tree::checkpoint`].
#[derive(Debug, Clone)]
struct Checkpoint {
    len: usize,
    root: NodeId,
    revision: u64,
    /// Original content of pre-existing nodes touched since the checkpoint.
    saved: FxHashMap<NodeId, Node>,
}

impl Tree {
    /// Creates a tree holding only a root node.
    pub fn new(root: Syntax) -> Self {
        let mut tree = Tree {
            nodes: Vec::new(),
            root: NodeId(0),
            attributes: AttributeStore::default(),
            origin: SourceOrigin::default(),
            revision: 0,
            checkpoint: None,
        };
        tree.root = tree.add(root);
        tree
    }

    pub fn with_origin(mut self, path: Option<PathBuf>, source: Option<String>) -> Self {
        self.origin = SourceOrigin {
            path,
            source: source.map(Arc::from),
        };
        self
    }

    pub fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    pub fn path(&self) -> Option<&Path> {
        self.origin.path.as_deref()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Monotonic counter bumped by every structural or syntax mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of slots in the arena, including discarded nodes.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    /// Allocates a free node without children.
    pub fn add(&mut self, syntax: Syntax) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            syntax,
            children: Vec::new(),
            parent: None,
            live: true,
        });
        id
    }

    /// Allocates a free node and attaches the given free nodes as its children.
    pub fn add_with_children(&mut self, syntax: Syntax, children: Vec<NodeId>) -> Result<NodeId> {
        let id = self.add(syntax);
        for child in children {
            self.push_child(id, child)?;
        }
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Whether the node exists and has not been discarded.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.contains(id) && self.node(id).live
    }

    /// Whether the node is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.node(current).parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn syntax(&self, id: NodeId) -> &Syntax {
        &self.node(id).syntax
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).syntax.kind()
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.node(id).syntax.name()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.node(id).children.get(index).copied()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Position of `id` within its parent's children.
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// Nearest strict ancestor of the given kind.
    pub fn enclosing(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.ancestors(id).find(|a| self.kind(*a) == kind)
    }

    /// Fully-qualified name of a `Class` node, prefixed by its enclosing namespace.
    pub fn qualified_class_name(&self, class: NodeId) -> Option<String> {
        let Syntax::Class { name, .. } = self.syntax(class) else {
            return None;
        };
        let namespace = self
            .enclosing(class, NodeKind::Namespace)
            .and_then(|ns| self.name(ns))
            .filter(|ns| !ns.is_empty());
        Some(match namespace {
            Some(ns) => format!("{}\\{}", normalize_class_name(ns), name),
            None => normalize_class_name(name).to_string(),
        })
    }

    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        id == ancestor || self.ancestors(id).any(|a| a == ancestor)
    }

    /// Pre-order listing of the subtree rooted at `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    // ---------------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------------

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeStore {
        &mut self.attributes
    }

    pub fn attr(&self, id: NodeId, key: AttributeKey) -> Option<&AttributeValue> {
        self.attributes.get(id, key)
    }

    pub fn has_attr(&self, id: NodeId, key: AttributeKey) -> bool {
        self.attributes.has(id, key)
    }

    pub fn set_attr(&mut self, id: NodeId, key: AttributeKey, value: AttributeValue) {
        self.attributes.set(id, key, value);
    }

    // ---------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------

    fn ensure_live(&self, id: NodeId) -> Result<()> {
        if self.is_live(id) {
            Ok(())
        } else {
            Err(RewriteError::invalid_mutation(id, "node does not exist or was discarded"))
        }
    }

    /// Checks that `child` may be attached below `parent`.
    fn ensure_attachable(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.ensure_live(parent)?;
        self.ensure_live(child)?;
        if child == self.root {
            return Err(RewriteError::invalid_mutation(child, "the root cannot become a child"));
        }
        if let Some(existing) = self.parent(child) {
            return Err(RewriteError::invalid_mutation(
                child,
                format!("node is already a child of {}", existing),
            ));
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(RewriteError::invalid_mutation(
                child,
                format!("attaching below {} would create a cycle", parent),
            ));
        }
        Ok(())
    }

    fn ensure_child_of(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self.ensure_live(parent)?;
        self.ensure_live(child)?;
        if self.parent(child) != Some(parent) {
            return Err(RewriteError::invalid_mutation(
                child,
                format!("node is not a direct child of {}", parent),
            ));
        }
        self.children(parent)
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| {
                RewriteError::InvariantViolation(format!(
                    "{} claims parent {} but is missing from its children",
                    child, parent
                ))
            })
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Mutable access to a node, recording its prior content while a checkpoint is open.
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            if id.index() < checkpoint.len && !checkpoint.saved.contains_key(&id) {
                checkpoint.saved.insert(id, self.nodes[id.index()].clone());
            }
        }
        &mut self.nodes[id.index()]
    }

    // ---------------------------------------------------------------------
    // Checkpoints
    // ---------------------------------------------------------------------

    /// Starts recording mutations so they can be undone with [`rollback`](Self::rollback).
    ///
    /// Checkpoints do not nest: opening one discards the previous one.
    pub fn checkpoint(&mut self) {
        self.checkpoint = Some(Checkpoint {
            len: self.nodes.len(),
            root: self.root,
            revision: self.revision,
            saved: FxHashMap::default(),
        });
        self.attributes.checkpoint();
    }

    /// Keeps every mutation made since the checkpoint.
    pub fn commit(&mut self) {
        self.checkpoint = None;
        self.attributes.commit();
    }

    /// Restores nodes, attributes, root and revision to the checkpoint.
    /// Nodes allocated since then are dropped.
    pub fn rollback(&mut self) {
        let Some(checkpoint) = self.checkpoint.take() else {
            return;
        };
        self.nodes.truncate(checkpoint.len);
        for (id, node) in checkpoint.saved {
            self.nodes[id.index()] = node;
        }
        self.root = checkpoint.root;
        self.revision = checkpoint.revision;
        self.attributes.rollback();
        trace!("Rolled back to revision {}", self.revision);
    }

    /// Mutable access to a node's syntax payload. Drops the cached resolved type,
    /// since the node's meaning may change.
    pub fn syntax_mut(&mut self, id: NodeId) -> &mut Syntax {
        self.touch();
        self.attributes.remove(id, AttributeKey::ResolvedType);
        &mut self.node_mut(id).syntax
    }

    pub fn push_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.ensure_attachable(parent, child)?;
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
        self.touch();
        Ok(())
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        self.ensure_attachable(parent, child)?;
        let len = self.children(parent).len();
        if index > len {
            return Err(RewriteError::invalid_mutation(
                parent,
                format!("insert position {} out of bounds ({} children)", index, len),
            ));
        }
        self.node_mut(parent).children.insert(index, child);
        self.node_mut(child).parent = Some(parent);
        self.touch();
        Ok(())
    }

    /// Unlinks `child` from `parent` and returns it as a free node that keeps
    /// its subtree and attributes, ready to be attached elsewhere.
    pub fn detach(&mut self, parent: NodeId, child: NodeId) -> Result<NodeId> {
        let index = self.ensure_child_of(parent, child)?;
        self.node_mut(parent).children.remove(index);
        self.node_mut(child).parent = None;
        self.touch();
        trace!("Detached {} from {}", child, parent);
        Ok(child)
    }

    /// Unlinks `child` from `parent` and discards its subtree.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.detach(parent, child)?;
        self.discard(child);
        Ok(())
    }

    /// Removes `id` from wherever it is attached.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        self.ensure_live(id)?;
        match self.parent(id) {
            Some(parent) => self.remove_child(parent, id),
            None if id == self.root => {
                Err(RewriteError::invalid_mutation(id, "the root cannot be removed"))
            }
            None => {
                self.discard(id);
                self.touch();
                Ok(())
            }
        }
    }

    /// Atomically substitutes `old` (a direct child of `parent`) with the free node `new`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> Result<()> {
        let index = self.ensure_child_of(parent, old)?;
        self.ensure_live(new)?;
        if new == self.root || self.parent(new).is_some() {
            return Err(RewriteError::invalid_mutation(new, "replacement is not a free node"));
        }
        if self.is_ancestor_or_self(new, parent) || self.is_ancestor_or_self(old, new) {
            return Err(RewriteError::invalid_mutation(
                new,
                format!("replacing {} would create a cycle", old),
            ));
        }
        self.node_mut(parent).children[index] = new;
        self.node_mut(new).parent = Some(parent);
        self.node_mut(old).parent = None;
        self.discard(old);
        self.touch();
        trace!("Replaced {} with {} under {}", old, new, parent);
        Ok(())
    }

    /// Substitutes `old` with `new` wherever `old` is attached, including the root.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.ensure_live(old)?;
        match self.parent(old) {
            Some(parent) => self.replace_child(parent, old, new),
            None if old == self.root => {
                self.ensure_live(new)?;
                if self.parent(new).is_some() || self.is_ancestor_or_self(old, new) {
                    return Err(RewriteError::invalid_mutation(new, "replacement is not a free node"));
                }
                self.root = new;
                self.discard(old);
                self.touch();
                Ok(())
            }
            None => Err(RewriteError::invalid_mutation(old, "node is not attached")),
        }
    }

    /// Substitutes `old` with a sequence of free nodes, e.g. one statement with several.
    pub fn replace_with_many(&mut self, old: NodeId, new: &[NodeId]) -> Result<()> {
        let parent = self
            .parent(old)
            .ok_or_else(|| RewriteError::invalid_mutation(old, "only a child can be expanded"))?;
        let index = self.ensure_child_of(parent, old)?;
        let mut seen = FxHashSet::default();
        for &n in new {
            if !seen.insert(n) {
                return Err(RewriteError::invalid_mutation(n, "node listed twice in replacement"));
            }
            self.ensure_live(n)?;
            if n == self.root || self.parent(n).is_some() || self.is_ancestor_or_self(n, parent) {
                return Err(RewriteError::invalid_mutation(n, "replacement is not a free node"));
            }
        }
        let _replaced: Vec<NodeId> = self
            .node_mut(parent)
            .children
            .splice(index..=index, new.iter().copied())
            .collect();
        for &n in new {
            self.node_mut(n).parent = Some(parent);
        }
        self.node_mut(old).parent = None;
        self.discard(old);
        self.touch();
        Ok(())
    }

    /// Detaches and returns every child of `id`.
    pub fn take_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.node_mut(id).children);
        for &child in &children {
            self.node_mut(child).parent = None;
        }
        if !children.is_empty() {
            self.touch();
        }
        children
    }

    /// Marks a free subtree as discarded and purges attributes referring to it.
    fn discard(&mut self, id: NodeId) {
        let removed: FxHashSet<NodeId> = self.descendants(id).into_iter().collect();
        for &n in &removed {
            self.node_mut(n).live = false;
        }
        self.attributes.forget(&removed);
        trace!("Discarded {} node(s) rooted at {}", removed.len(), id);
    }

    /// Verifies the parent/child invariants for every node reachable from the root.
    pub fn validate(&self) -> Result<()> {
        if self.parent(self.root).is_some() {
            return Err(RewriteError::InvariantViolation(format!(
                "root {} has a parent",
                self.root
            )));
        }
        let mut seen = FxHashSet::default();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !self.is_live(id) {
                return Err(RewriteError::InvariantViolation(format!(
                    "discarded node {} is still reachable",
                    id
                )));
            }
            if !seen.insert(id) {
                return Err(RewriteError::InvariantViolation(format!(
                    "node {} appears more than once",
                    id
                )));
            }
            for &child in self.children(id) {
                if self.parent(child) != Some(id) {
                    return Err(RewriteError::InvariantViolation(format!(
                        "{} is listed under {} but its parent is {:?}",
                        child,
                        id,
                        self.parent(child)
                    )));
                }
                stack.push(child);
            }
        }
        Ok(())
    }
}

/// Iterator over a node's ancestors.
pub struct Ancestors<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}
