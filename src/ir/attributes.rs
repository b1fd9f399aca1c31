//! Per-node attribute side-channel.
//!
//! Rules and the type oracle attach metadata to nodes without touching the
//! node structure: resolved types, the enclosing class, "already processed"
//! markers, positions, opaque printer data. Keys form a closed set and every
//! value is a variant of [`AttributeValue`], so a lookup never needs a downcast.
//!
//! Values are either `Copy` or share ownership through `Arc`; reading an
//! attribute never deep-clones.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::node::NodeId;
use super::scope::Scope;
use super::types::TypeDescriptor;

/// Closed set of attribute keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKey {
    /// Cached result of the type oracle (`AttributeValue::Type`).
    ResolvedType,
    /// Class declaration enclosing the node (`AttributeValue::Node`).
    EnclosingClass,
    /// Lexical scope the node is evaluated in (`AttributeValue::Scope`).
    Scope,
    /// Set on methods that already carry an explicit route annotation.
    HasRouteAnnotation,
    /// Node this one was derived from (`AttributeValue::Node`).
    OriginalNode,
    /// Idempotence guard set by rules on the nodes they produce.
    Processed,
    /// Source location handed over by the parser (`AttributeValue::Span`).
    SourceSpan,
    /// Formatting data the engine does not interpret (`AttributeValue::Opaque`).
    PrinterMeta,
}

/// Byte range and first line of a node in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
    pub line: u32,
}

/// Tagged attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Flag(bool),
    Node(NodeId),
    Type(Arc<TypeDescriptor>),
    Scope(Arc<Scope>),
    Span(SourceSpan),
    Text(Arc<str>),
    Opaque(Arc<serde_json::Value>),
}

impl AttributeValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AttributeValue::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            AttributeValue::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            AttributeValue::Type(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_scope(&self) -> Option<&Arc<Scope>> {
        match self {
            AttributeValue::Scope(scope) => Some(scope),
            _ => None,
        }
    }
}

type Bag = Vec<(AttributeKey, AttributeValue)>;

/// Attribute storage for one tree. Owned by the [`Tree`](super::node::Tree),
/// so its lifetime is exactly one tree-run.
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    bags: FxHashMap<NodeId, Bag>,
    /// Original bags of the nodes touched since the open checkpoint.
    journal: Option<FxHashMap<NodeId, Option<Bag>>>,
}

impl AttributeStore {
    /// Returns the value, or `None` when the key is absent.
    pub fn get(&self, node: NodeId, key: AttributeKey) -> Option<&AttributeValue> {
        self.bags
            .get(&node)
            .and_then(|bag| bag.iter().find(|(k, _)| *k == key).map(|(_, v)| v))
    }

    pub fn has(&self, node: NodeId, key: AttributeKey) -> bool {
        self.get(node, key).is_some()
    }

    /// Reads a flag attribute; absent counts as `false`.
    pub fn flag(&self, node: NodeId, key: AttributeKey) -> bool {
        self.get(node, key)
            .and_then(AttributeValue::as_flag)
            .unwrap_or(false)
    }

    fn save(&mut self, node: NodeId) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        if !journal.contains_key(&node) {
            journal.insert(node, self.bags.get(&node).cloned());
        }
    }

    /// Starts recording changes so they can be undone with [`rollback`](Self::rollback).
    pub(crate) fn checkpoint(&mut self) {
        self.journal = Some(FxHashMap::default());
    }

    /// Keeps every change made since the checkpoint.
    pub(crate) fn commit(&mut self) {
        self.journal = None;
    }

    /// Restores the bags recorded at the checkpoint.
    pub(crate) fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (node, bag) in journal {
            match bag {
                Some(bag) => {
                    self.bags.insert(node, bag);
                }
                None => {
                    self.bags.remove(&node);
                }
            }
        }
    }

    /// Sets or overwrites a value.
    pub fn set(&mut self, node: NodeId, key: AttributeKey, value: AttributeValue) {
        self.save(node);
        let bag = self.bags.entry(node).or_default();
        match bag.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => bag.push((key, value)),
        }
    }

    pub fn remove(&mut self, node: NodeId, key: AttributeKey) -> Option<AttributeValue> {
        if !self.has(node, key) {
            return None;
        }
        self.save(node);
        let bag = self.bags.get_mut(&node)?;
        let index = bag.iter().position(|(k, _)| *k == key)?;
        let (_, value) = bag.swap_remove(index);
        if bag.is_empty() {
            self.bags.remove(&node);
        }
        Some(value)
    }

    /// Clears one key on every node.
    pub fn clear_key(&mut self, key: AttributeKey) {
        let touched: Vec<NodeId> = self
            .bags
            .iter()
            .filter(|(_, bag)| bag.iter().any(|(k, _)| *k == key))
            .map(|(node, _)| *node)
            .collect();
        for node in touched {
            self.save(node);
        }
        for bag in self.bags.values_mut() {
            bag.retain(|(k, _)| *k != key);
        }
        self.bags.retain(|_, bag| !bag.is_empty());
    }

    /// Drops the attributes of discarded nodes and every node reference that
    /// points at one of them.
    pub fn forget(&mut self, removed: &FxHashSet<NodeId>) {
        if self.journal.is_some() {
            let touched: Vec<NodeId> = self
                .bags
                .iter()
                .filter(|(node, bag)| {
                    removed.contains(node)
                        || bag.iter().any(|(_, value)| {
                            matches!(value, AttributeValue::Node(target) if removed.contains(target))
                        })
                })
                .map(|(node, _)| *node)
                .collect();
            for node in touched {
                self.save(node);
            }
        }
        self.bags.retain(|node, _| !removed.contains(node));
        for bag in self.bags.values_mut() {
            bag.retain(|(_, value)| match value {
                AttributeValue::Node(target) => !removed.contains(target),
                _ => true,
            });
        }
        self.bags.retain(|_, bag| !bag.is_empty());
    }

    /// Number of nodes carrying at least one attribute.
    pub fn len(&self) -> usize {
        self.bags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }
}
