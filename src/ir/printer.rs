//! Debug printer rendering a tree as PHP-like source.
//!
//! Layout-preserving output is the job of the external printer fed with
//! [`TreeDocument`](super::document::TreeDocument)s; this one exists for the
//! CLI's `--print` mode, for generated files and for tests.

use super::node::{NodeId, NodeKind, Syntax, Tree, normalize_class_name};
use crate::error::Result;

const INDENT: &str = "    ";

/// Renders the attached part of the tree.
pub fn format(tree: &Tree) -> Result<String> {
    tree.validate()?;
    let mut printer = Printer {
        tree,
        out: String::new(),
        depth: 0,
    };
    printer.statement(tree.root());
    Ok(printer.out)
}

/// Renders a single expression node.
pub fn format_expression(tree: &Tree, id: NodeId) -> String {
    Printer {
        tree,
        out: String::new(),
        depth: 0,
    }
    .expression(id)
}

struct Printer<'a> {
    tree: &'a Tree,
    out: String,
    depth: usize,
}

impl Printer<'_> {
    fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, children: &[NodeId]) {
        self.line("{");
        self.depth += 1;
        for &child in children {
            self.statement(child);
        }
        self.depth -= 1;
        self.line("}");
    }

    fn statement(&mut self, id: NodeId) {
        let tree = self.tree;
        let children = tree.children(id);
        match tree.syntax(id) {
            Syntax::File => {
                self.line("<?php");
                for &child in children {
                    self.line("");
                    self.statement(child);
                }
            }
            Syntax::Namespace { name } => {
                self.line(&format!("namespace {};", normalize_class_name(name)));
                for &child in children {
                    self.line("");
                    self.statement(child);
                }
            }
            Syntax::Class {
                name,
                extends,
                implements,
            } => {
                let mut header = format!("class {}", name);
                if let Some(parent) = extends {
                    header.push_str(&format!(" extends \\{}", normalize_class_name(parent)));
                }
                if !implements.is_empty() {
                    let names: Vec<String> = implements
                        .iter()
                        .map(|i| format!("\\{}", normalize_class_name(i)))
                        .collect();
                    header.push_str(&format!(" implements {}", names.join(", ")));
                }
                self.line(&header);
                self.block(children);
            }
            Syntax::ClassMethod { name } | Syntax::Function { name } => {
                let (annotations, body): (Vec<NodeId>, Vec<NodeId>) = children
                    .iter()
                    .partition(|c| tree.kind(**c) == NodeKind::Annotation);
                if !annotations.is_empty() {
                    self.line("/**");
                    for annotation in annotations {
                        let rendered = self.annotation(annotation);
                        self.line(&format!(" * {}", rendered));
                    }
                    self.line(" */");
                }
                let visibility = if tree.kind(id) == NodeKind::ClassMethod {
                    "public "
                } else {
                    ""
                };
                self.line(&format!("{}function {}()", visibility, name));
                self.block(&body);
            }
            Syntax::Expression => {
                let expr = children.first().map(|c| self.expression(*c)).unwrap_or_default();
                self.line(&format!("{};", expr));
            }
            Syntax::Return => match children.first() {
                Some(value) => {
                    let expr = self.expression(*value);
                    self.line(&format!("return {};", expr));
                }
                None => self.line("return;"),
            },
            Syntax::Annotation { .. } => {
                let rendered = self.annotation(id);
                self.line(&format!("/** {} */", rendered));
            }
            Syntax::Opaque { label } => self.line(label),
            _ => {
                let expr = self.expression(id);
                self.line(&format!("{};", expr));
            }
        }
    }

    fn arguments(&self, args: &[NodeId]) -> String {
        args.iter()
            .map(|a| self.expression(*a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expression(&self, id: NodeId) -> String {
        let tree = self.tree;
        let children = tree.children(id);
        let first = || children.first().map(|c| self.expression(*c)).unwrap_or_default();
        match tree.syntax(id) {
            Syntax::Assign => {
                let value = children.get(1).map(|c| self.expression(*c)).unwrap_or_default();
                format!("{} = {}", first(), value)
            }
            Syntax::Variable { name } => format!("${}", name),
            Syntax::New { class } => {
                format!("new \\{}({})", normalize_class_name(class), self.arguments(children))
            }
            Syntax::MethodCall { name } => {
                let args = children.get(1..).unwrap_or(&[]);
                format!("{}->{}({})", first(), name, self.arguments(args))
            }
            Syntax::StaticCall { class, name } => format!(
                "\\{}::{}({})",
                normalize_class_name(class),
                name,
                self.arguments(children)
            ),
            Syntax::FuncCall { name } => format!("{}({})", name, self.arguments(children)),
            Syntax::PropertyFetch { name } => format!("{}->{}", first(), name),
            Syntax::ClassConstFetch { class, constant } => {
                format!("\\{}::{}", normalize_class_name(class), constant)
            }
            Syntax::Array => format!("[{}]", self.arguments(children)),
            Syntax::ArrayItem { keyed: true } => {
                let value = children.get(1).map(|c| self.expression(*c)).unwrap_or_default();
                format!("{} => {}", first(), value)
            }
            Syntax::ArrayItem { keyed: false } => first(),
            Syntax::String { value } => quote(value, '\''),
            Syntax::Int { value } => value.to_string(),
            Syntax::Bool { value } => value.to_string(),
            Syntax::Null => "null".to_string(),
            Syntax::Opaque { label } => label.clone(),
            Syntax::Annotation { .. } => self.annotation(id),
            other => format!("/* {} */", other.kind()),
        }
    }

    /// Doctrine-style annotation: `@\Name("value", key="value", list={"A"})`.
    fn annotation(&self, id: NodeId) -> String {
        let name = self.tree.name(id).unwrap_or_default();
        let args: Vec<String> = self
            .tree
            .children(id)
            .iter()
            .map(|a| self.annotation_value(*a))
            .collect();
        format!("@\\{}({})", normalize_class_name(name), args.join(", "))
    }

    fn annotation_value(&self, id: NodeId) -> String {
        let tree = self.tree;
        let children = tree.children(id);
        match tree.syntax(id) {
            Syntax::String { value } => quote(value, '"'),
            Syntax::Array => {
                let items: Vec<String> = children.iter().map(|c| self.annotation_value(*c)).collect();
                format!("{{{}}}", items.join(", "))
            }
            Syntax::ArrayItem { keyed: true } => {
                let key = match children.first().map(|k| tree.syntax(*k)) {
                    Some(Syntax::String { value }) => value.clone(),
                    _ => children.first().map(|k| self.expression(*k)).unwrap_or_default(),
                };
                let value = children.get(1).map(|v| self.annotation_value(*v)).unwrap_or_default();
                format!("{}={}", key, value)
            }
            Syntax::ArrayItem { keyed: false } => {
                children.first().map(|v| self.annotation_value(*v)).unwrap_or_default()
            }
            _ => self.expression(id),
        }
    }
}

fn quote(value: &str, delimiter: char) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push(delimiter);
    for c in value.chars() {
        if c == delimiter || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push(delimiter);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::document::{NodeDocument, TreeDocument};
    use indoc::indoc;

    fn doc(syntax: Syntax) -> NodeDocument {
        NodeDocument::new(syntax)
    }

    #[test]
    fn test_prints_form_builder_code() {
        let call = doc(Syntax::method_call("add")).with_children([
            doc(Syntax::variable("form")),
            doc(Syntax::string("name")),
            doc(Syntax::class_const("Symfony\\Component\\Form\\Extension\\Core\\Type\\TextType", "class")),
            doc(Syntax::Array).child(
                doc(Syntax::ArrayItem { keyed: true })
                    .with_children([doc(Syntax::string("label")), doc(Syntax::string("Name:"))]),
            ),
        ]);
        let method = doc(Syntax::ClassMethod { name: "createComponentForm".into() })
            .child(
                doc(Syntax::Annotation { name: "Symfony\\Component\\Routing\\Annotation\\Route".into() })
                    .child(doc(Syntax::string("/form"))),
            )
            .child(doc(Syntax::Expression).child(call));
        let class = doc(Syntax::Class {
            name: "HomePresenter".into(),
            extends: None,
            implements: vec![],
        })
        .child(method);
        let root = doc(Syntax::File).child(doc(Syntax::Namespace { name: "App".into() }).child(class));
        let tree = Tree::from_document(TreeDocument::new(root)).unwrap();

        let expected = indoc! {r#"
            <?php

            namespace App;

            class HomePresenter
            {
                /**
                 * @\Symfony\Component\Routing\Annotation\Route("/form")
                 */
                public function createComponentForm()
                {
                    $form->add('name', \Symfony\Component\Form\Extension\Core\Type\TextType::class, ['label' => 'Name:']);
                }
            }
        "#};
        assert_eq!(format(&tree).unwrap(), expected);
    }

    #[test]
    fn test_quotes_are_escaped() {
        assert_eq!(quote("it's", '\''), r"'it\'s'");
        assert_eq!(quote(r"a\b", '"'), r#""a\\b""#);
    }
}
