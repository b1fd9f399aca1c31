//! Tree builders shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use nette_symfony_rewriter::ir::document::{NodeDocument, TreeDocument};
use nette_symfony_rewriter::ir::node::{NodeId, NodeKind, Syntax, Tree};
use nette_symfony_rewriter::ir::types::{ClassEntry, ClassIndex, IndexedTypeOracle};
use test_utils::ir::generator::{LegacyArg, LegacyFormCall, LegacyPresenter};

pub const FORM: &str = "Nette\\Application\\UI\\Form";
pub const PRESENTER: &str = "Nette\\Application\\UI\\Presenter";
pub const TYPE_NAMESPACE: &str = "\\Symfony\\Component\\Form\\Extension\\Core\\Type";

pub fn class_index() -> ClassIndex {
    ClassIndex::new()
        .with_class("Nette\\Application\\IPresenter", ClassEntry::new())
        .with_class(PRESENTER, ClassEntry::new().implements("Nette\\Application\\IPresenter"))
        .with_class(FORM, ClassEntry::new().method("addText", "Nette\\Forms\\Controls\\TextInput"))
}

pub fn oracle() -> Arc<IndexedTypeOracle> {
    Arc::new(IndexedTypeOracle::new(Arc::new(class_index())))
}

pub fn doc(syntax: Syntax) -> NodeDocument {
    NodeDocument::new(syntax)
}

pub fn string(value: &str) -> NodeDocument {
    doc(Syntax::string(value))
}

/// `$var = new Nette\Application\UI\Form;`
pub fn form_construction(var: &str) -> NodeDocument {
    doc(Syntax::Expression).child(
        doc(Syntax::Assign)
            .child(doc(Syntax::variable(var)))
            .child(doc(Syntax::New { class: FORM.to_string() })),
    )
}

/// `$var->method(args...);`
pub fn form_call(var: &str, method: &str, args: Vec<NodeDocument>) -> NodeDocument {
    doc(Syntax::Expression).child(
        doc(Syntax::method_call(method))
            .child(doc(Syntax::variable(var)))
            .with_children(args),
    )
}

/// `['key' => 'value', ...]`
pub fn items(entries: &[(&str, &str)]) -> NodeDocument {
    doc(Syntax::Array).with_children(entries.iter().map(|(k, v)| {
        doc(Syntax::ArrayItem { keyed: true }).child(string(k)).child(string(v))
    }))
}

/// `namespace App; class HomePresenter extends Presenter { function createComponentForm() { body } }`
pub fn presenter(body: Vec<NodeDocument>) -> TreeDocument {
    presenter_in(Some("App"), "HomePresenter", body)
}

pub fn presenter_in(namespace: Option<&str>, class: &str, body: Vec<NodeDocument>) -> TreeDocument {
    let method = doc(Syntax::ClassMethod {
        name: "createComponentForm".to_string(),
    })
    .with_children(body);
    let class = doc(Syntax::Class {
        name: class.to_string(),
        extends: Some(PRESENTER.to_string()),
        implements: vec![],
    })
    .child(method);
    let root = match namespace {
        Some(ns) => doc(Syntax::File).child(doc(Syntax::Namespace { name: ns.to_string() }).child(class)),
        None => doc(Syntax::File).child(class),
    };
    TreeDocument::new(root)
}

/// Login form from the Nette documentation.
pub fn login_form() -> TreeDocument {
    presenter(vec![
        form_construction("form"),
        form_call("form", "addText", vec![string("name"), string("Name:")]),
        form_call("form", "addSubmit", vec![string("login"), string("Sign up")]),
    ])
}

pub fn legacy_arg(arg: &LegacyArg) -> NodeDocument {
    match arg {
        LegacyArg::Str(s) => string(s),
        LegacyArg::Int(i) => doc(Syntax::Int { value: *i }),
        LegacyArg::Bool(b) => doc(Syntax::Bool { value: *b }),
        LegacyArg::Var(v) => doc(Syntax::variable(v.as_str())),
        LegacyArg::Items(entries) => {
            let entries: Vec<(&str, &str)> = entries.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            items(&entries)
        }
    }
}

pub fn legacy_call(var: &str, call: &LegacyFormCall) -> NodeDocument {
    let mut args = vec![string(&call.name)];
    args.extend(call.args.iter().map(legacy_arg));
    form_call(var, &call.method, args)
}

pub fn legacy_presenter(p: &LegacyPresenter) -> TreeDocument {
    let mut body = vec![form_construction(&p.form_var)];
    body.extend(p.calls.iter().map(|c| legacy_call(&p.form_var, c)));
    presenter_in(p.namespace.as_deref(), &p.class_name, body)
}

pub fn tree(document: TreeDocument) -> Tree {
    Tree::from_document(document).unwrap()
}

/// Expression nodes of the first method body, one per statement.
pub fn statements(tree: &Tree) -> Vec<NodeId> {
    let method = tree
        .descendants(tree.root())
        .into_iter()
        .find(|id| tree.kind(*id) == NodeKind::ClassMethod)
        .unwrap();
    tree.children(method)
        .iter()
        .filter(|s| tree.kind(**s) == NodeKind::Expression)
        .map(|s| tree.child(*s, 0).unwrap())
        .collect()
}
