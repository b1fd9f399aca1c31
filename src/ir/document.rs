//! Serialized tree exchange format.
//!
//! The external parser hands trees over as JSON documents and receives the
//! rewritten tree back in the same shape. Formatting data the engine does not
//! interpret travels in `meta` and is returned untouched.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::attributes::{AttributeKey, AttributeValue, SourceSpan};
use super::node::{NodeId, Syntax, Tree};
use crate::error::{Result, RewriteError};

/// One file's tree as exchanged with the parser and printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub root: NodeDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub syntax: Syntax,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl NodeDocument {
    pub fn new(syntax: Syntax) -> Self {
        NodeDocument {
            syntax,
            children: Vec::new(),
            span: None,
            meta: None,
        }
    }

    pub fn child(mut self, child: NodeDocument) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = NodeDocument>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl TreeDocument {
    pub fn new(root: NodeDocument) -> Self {
        TreeDocument {
            path: None,
            source: None,
            root,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RewriteError::Document(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RewriteError::Document(e.to_string()))
    }
}

/// Deepest nesting accepted from a document. The traversal and the printer
/// recurse once per level.
pub const MAX_DEPTH: usize = 512;

impl Tree {
    /// Builds an arena tree from a document.
    pub fn from_document(document: TreeDocument) -> Result<Tree> {
        let TreeDocument { path, source, root } = document;
        let NodeDocument {
            syntax,
            children,
            span,
            meta,
        } = root;
        let mut tree = Tree::new(syntax).with_origin(path, source);
        let root_id = tree.root();
        attach_extras(&mut tree, root_id, span, meta);

        // (parent, depth of the child, child), in reverse so siblings keep their order.
        let mut stack: Vec<(NodeId, usize, NodeDocument)> =
            children.into_iter().rev().map(|c| (root_id, 1, c)).collect();
        while let Some((parent, depth, document)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(RewriteError::Document(format!(
                    "tree is nested deeper than {} levels",
                    MAX_DEPTH
                )));
            }
            let NodeDocument {
                syntax,
                children,
                span,
                meta,
            } = document;
            let id = tree.add(syntax);
            attach_extras(&mut tree, id, span, meta);
            tree.push_child(parent, id)?;
            stack.extend(children.into_iter().rev().map(|c| (id, depth + 1, c)));
        }
        Ok(tree)
    }

    /// Serializes the attached part of the tree.
    pub fn to_document(&self) -> Result<TreeDocument> {
        self.validate()?;
        Ok(TreeDocument {
            path: self.origin().path.clone(),
            source: self.origin().source.as_deref().map(str::to_string),
            root: self.node_document(self.root())?,
        })
    }

    fn node_document(&self, root: NodeId) -> Result<NodeDocument> {
        // (node, its children serialized so far)
        let mut stack: Vec<(NodeId, Vec<NodeDocument>)> = vec![(root, Vec::new())];
        while let Some((id, done)) = stack.last_mut() {
            if let Some(&next) = self.children(*id).get(done.len()) {
                stack.push((next, Vec::new()));
                continue;
            }
            let Some((id, children)) = stack.pop() else {
                break;
            };
            let document = self.shallow_document(id, children);
            match stack.last_mut() {
                Some((_, siblings)) => siblings.push(document),
                None => return Ok(document),
            }
        }
        Err(RewriteError::Document(format!("could not serialize node {}", root)))
    }

    fn shallow_document(&self, id: NodeId, children: Vec<NodeDocument>) -> NodeDocument {
        let span = match self.attr(id, AttributeKey::SourceSpan) {
            Some(AttributeValue::Span(span)) => Some(*span),
            _ => None,
        };
        let meta = match self.attr(id, AttributeKey::PrinterMeta) {
            Some(AttributeValue::Opaque(value)) => Some(value.as_ref().clone()),
            _ => None,
        };
        NodeDocument {
            syntax: self.syntax(id).clone(),
            children,
            span,
            meta,
        }
    }
}

fn attach_extras(tree: &mut Tree, id: NodeId, span: Option<SourceSpan>, meta: Option<serde_json::Value>) {
    if let Some(span) = span {
        tree.set_attr(id, AttributeKey::SourceSpan, AttributeValue::Span(span));
    }
    if let Some(meta) = meta {
        tree.set_attr(id, AttributeKey::PrinterMeta, AttributeValue::Opaque(Arc::new(meta)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_document_from_json() {
        let json = indoc! {r#"
            {
              "path": "app/HomePresenter.php",
              "root": {
                "syntax": {"kind": "File"},
                "children": [
                  {
                    "syntax": {"kind": "Expression"},
                    "meta": {"comments": ["// keep me"]},
                    "children": [
                      {"syntax": {"kind": "Variable", "name": "form"}, "span": {"start": 6, "end": 11, "line": 2}}
                    ]
                  }
                ]
              }
            }
        "#};
        let doc = TreeDocument::from_json(json).unwrap();
        let tree = Tree::from_document(doc.clone()).unwrap();

        let stmt = tree.child(tree.root(), 0).unwrap();
        let var = tree.child(stmt, 0).unwrap();
        assert_eq!(tree.name(var), Some("form"));
        assert!(tree.has_attr(stmt, AttributeKey::PrinterMeta));
        assert!(tree.has_attr(var, AttributeKey::SourceSpan));
        assert_eq!(tree.path().unwrap().to_str(), Some("app/HomePresenter.php"));

        assert_eq!(tree.to_document().unwrap(), doc);
    }

    /// `File > Expression > Array > Array > ...` with `depth` arrays.
    fn nested_arrays(depth: usize) -> TreeDocument {
        let mut node = NodeDocument::new(Syntax::Int { value: 1 });
        for _ in 0..depth {
            node = NodeDocument::new(Syntax::Array).child(node);
        }
        TreeDocument::new(NodeDocument::new(Syntax::File).child(NodeDocument::new(Syntax::Expression).child(node)))
    }

    #[test]
    fn test_deep_document_round_trips() {
        let doc = nested_arrays(MAX_DEPTH - 2);
        let tree = Tree::from_document(doc.clone()).unwrap();
        assert_eq!(tree.to_document().unwrap(), doc);
    }

    #[test]
    fn test_too_deep_document_is_rejected() {
        let err = Tree::from_document(nested_arrays(MAX_DEPTH)).unwrap_err();
        assert!(matches!(err, RewriteError::Document(message) if message.contains("512")));
    }

    #[test]
    fn test_malformed_document() {
        let err = TreeDocument::from_json(r#"{"root": {"syntax": {"kind": "Bogus"}}}"#).unwrap_err();
        assert!(matches!(err, RewriteError::Document(_)));
    }
}
