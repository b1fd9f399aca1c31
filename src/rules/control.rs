//! Nette UI controls to Symfony controllers.
//!
//! ```php
//! class PollControl extends Control                 class PollController extends AbstractController
//! {                                                 {
//!     public function render()                          public function poll()
//!     {                                         =>      {
//!         $this->template->question = $q;                  return $this->render('poll.latte', ['question' => $q]);
//!         $this->template->render('poll.latte');        }
//!     }                                             }
//! }
//! ```
//!
//! Only top-level statements of `render()` are collected. A control whose
//! template file cannot be found is left alone.

use tracing::debug;

use crate::error::Result;
use crate::ir::node::{NodeId, NodeKind, Syntax, Tree, normalize_class_name};
use crate::ir::rule::{RewriteRule, RuleContext, RuleOutcome};

const CONTROL: &str = "Nette\\Application\\UI\\Control";
const PRESENTER: &str = "Nette\\Application\\IPresenter";
const ABSTRACT_CONTROLLER: &str = "Symfony\\Bundle\\FrameworkBundle\\Controller\\AbstractController";

/// What `render()` hands to its template.
#[derive(Debug, Default)]
struct TemplateRender {
    file: Option<NodeId>,
    variables: Vec<(String, NodeId)>,
    statements: Vec<NodeId>,
}

pub struct NetteControlToSymfonyController;

impl NetteControlToSymfonyController {
    pub const ID: &'static str = "nette_control_to_symfony_controller";

    /// Direct controls, or subclasses known to the oracle that are not presenters.
    fn is_control(ctx: &RuleContext<'_>, parent: &str) -> bool {
        let parent = normalize_class_name(parent);
        parent == CONTROL
            || (ctx.oracle().is_subtype(parent, CONTROL) && !ctx.oracle().is_subtype(parent, PRESENTER))
    }

    /// `PollControl` -> (`PollController`, `poll`).
    pub fn controller_names(control: &str) -> (String, String) {
        let stem = control.strip_suffix("Control").unwrap_or(control);
        let mut chars = stem.chars();
        let action = match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => "index".to_string(),
        };
        (format!("{}Controller", stem), action)
    }

    /// `$this->template`
    fn is_template(tree: &Tree, node: NodeId) -> bool {
        matches!(tree.syntax(node), Syntax::PropertyFetch { name } if name == "template")
            && tree
                .child(node, 0)
                .is_some_and(|this| tree.name(this) == Some("this") && tree.kind(this) == NodeKind::Variable)
    }

    fn collect(tree: &Tree, render: NodeId) -> TemplateRender {
        let mut found = TemplateRender::default();
        for &statement in tree.children(render) {
            if tree.kind(statement) != NodeKind::Expression {
                continue;
            }
            let Some(expr) = tree.child(statement, 0) else {
                continue;
            };
            match tree.syntax(expr) {
                // $this->template->name = value;
                Syntax::Assign => {
                    let (Some(target), Some(value)) = (tree.child(expr, 0), tree.child(expr, 1)) else {
                        continue;
                    };
                    if let Syntax::PropertyFetch { name } = tree.syntax(target) {
                        if tree.child(target, 0).is_some_and(|t| Self::is_template(tree, t)) {
                            found.variables.push((name.clone(), value));
                            found.statements.push(statement);
                        }
                    }
                }
                // $this->template->render(file) / setFile(file)
                Syntax::MethodCall { name } if name == "render" || name == "setFile" => {
                    if tree.child(expr, 0).is_some_and(|t| Self::is_template(tree, t)) {
                        if let Some(file) = tree.child(expr, 1) {
                            found.file = Some(file);
                        }
                        found.statements.push(statement);
                    }
                }
                _ => {}
            }
        }
        found
    }

    /// `return $this->render(file, ['name' => value, ...]);`
    fn build_return(tree: &mut Tree, render: &TemplateRender, file: NodeId) -> Result<NodeId> {
        let this = tree.add(Syntax::variable("this"));
        let mut args = vec![this, file];
        if !render.variables.is_empty() {
            let mut items = Vec::with_capacity(render.variables.len());
            for (name, value) in &render.variables {
                let key = tree.add(Syntax::string(name.clone()));
                items.push(tree.add_with_children(Syntax::ArrayItem { keyed: true }, vec![key, *value])?);
            }
            args.push(tree.add_with_children(Syntax::Array, items)?);
        }
        let call = tree.add_with_children(Syntax::method_call("render"), args)?;
        tree.add_with_children(Syntax::Return, vec![call])
    }
}

impl RewriteRule for NetteControlToSymfonyController {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Turn Nette UI controls into Symfony controllers"
    }

    fn accepted_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Class]
    }

    fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        let tree = ctx.tree();
        let Syntax::Class {
            name,
            extends: Some(parent),
            implements,
        } = tree.syntax(node)
        else {
            return Ok(RuleOutcome::Unchanged);
        };
        if !Self::is_control(ctx, parent) {
            return Ok(RuleOutcome::Unchanged);
        }
        let Some(render) = tree
            .children(node)
            .iter()
            .copied()
            .find(|m| tree.kind(*m) == NodeKind::ClassMethod && tree.name(*m) == Some("render"))
        else {
            return Ok(RuleOutcome::Unchanged);
        };
        let collected = Self::collect(tree, render);
        let Some(file) = collected.file else {
            return Ok(RuleOutcome::Unchanged);
        };
        let (controller, action) = Self::controller_names(name);
        let implements = implements.clone();

        let tree = ctx.tree_mut();
        for &(_, value) in &collected.variables {
            if let Some(parent) = tree.parent(value) {
                tree.detach(parent, value)?;
            }
        }
        if let Some(parent) = tree.parent(file) {
            tree.detach(parent, file)?;
        }
        for &statement in &collected.statements {
            tree.remove_child(render, statement)?;
        }
        let ret = Self::build_return(tree, &collected, file)?;
        tree.push_child(render, ret)?;

        *tree.syntax_mut(render) = Syntax::ClassMethod { name: action.clone() };
        *tree.syntax_mut(node) = Syntax::Class {
            name: controller.clone(),
            extends: Some(ABSTRACT_CONTROLLER.to_string()),
            implements,
        };
        debug!("Converted control {} into {}::{}()", node, controller, action);
        Ok(RuleOutcome::Mutated)
    }
}
