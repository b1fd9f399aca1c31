//! Nette presenter forms to the Symfony form builder.
//!
//! ```php
//! $form = new Nette\Application\UI\Form;        $form = $this->createFormBuilder();
//! $form->addText('name', 'Name:');          =>  $form->add('name', TextType::class, ['label' => 'Name:']);
//! ```

use tracing::debug;

use crate::error::Result;
use crate::ir::attributes::{AttributeKey, AttributeValue};
use crate::ir::matcher::{self, Predicate, call_args};
use crate::ir::node::{NodeId, NodeKind, Syntax};
use crate::ir::rule::{RewriteRule, RuleContext, RuleOutcome};

const PRESENTER: &str = "Nette\\Application\\IPresenter";
const FORM: &str = "Nette\\Application\\UI\\Form";
const TYPE_NAMESPACE: &str = "Symfony\\Component\\Form\\Extension\\Core\\Type";

pub struct NetteFormToSymfonyForm {
    in_presenter: Predicate,
    form_construction: Predicate,
    field_call: Predicate,
}

impl NetteFormToSymfonyForm {
    pub const ID: &'static str = "nette_form_to_symfony_form";

    /// Legacy field method to Symfony form type (short name).
    const FIELD_TYPES: &'static [(&'static str, &'static str)] = &[
        ("addText", "TextType"),
        ("addPassword", "PasswordType"),
        ("addTextArea", "TextareaType"),
        ("addEmail", "EmailType"),
        ("addInteger", "IntegerType"),
        ("addHidden", "HiddenType"),
        ("addUpload", "FileType"),
        ("addMultiUpload", "FileType"),
        ("addSubmit", "SubmitType"),
        ("addButton", "ButtonType"),
        ("addCheckbox", "CheckboxType"),
        ("addSelect", "ChoiceType"),
        ("addRadioList", "ChoiceType"),
        ("addCheckboxList", "ChoiceType"),
        ("addMultiSelect", "ChoiceType"),
    ];

    /// Choice-family methods to their `(expanded, multiple)` options.
    const CHOICE_OPTIONS: &'static [(&'static str, bool, bool)] = &[
        ("addSelect", false, false),
        ("addRadioList", true, false),
        ("addCheckboxList", true, true),
        ("addMultiSelect", false, true),
    ];

    /// Methods forcing `multiple => true` outside the choice family.
    const MULTIPLE_METHODS: &'static [&'static str] = &["addMultiUpload"];

    pub fn new() -> Self {
        let methods: Vec<&str> = Self::FIELD_TYPES.iter().map(|(m, _)| *m).collect();
        NetteFormToSymfonyForm {
            in_presenter: matcher::enclosing_class_instance_of(PRESENTER),
            form_construction: matcher::new_of(FORM),
            field_call: matcher::call_named(&methods).and(matcher::receiver_instance_of(FORM)),
        }
    }

    pub fn field_type(method: &str) -> Option<String> {
        Self::FIELD_TYPES
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, ty)| format!("{}\\{}", TYPE_NAMESPACE, ty))
    }

    pub fn choice_options(method: &str) -> Option<(bool, bool)> {
        Self::CHOICE_OPTIONS
            .iter()
            .find(|(m, _, _)| *m == method)
            .map(|(_, expanded, multiple)| (*expanded, *multiple))
    }

    /// `new Form` becomes `$this->createFormBuilder()`.
    fn rewrite_construction(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        let tree = ctx.tree_mut();
        let this = tree.add(Syntax::variable("this"));
        let call = tree.add_with_children(Syntax::method_call("createFormBuilder"), vec![this])?;
        tree.set_attr(call, AttributeKey::Processed, AttributeValue::Flag(true));
        tree.replace(node, call)?;
        debug!("Replaced form construction {} with builder call {}", node, call);
        Ok(RuleOutcome::Replaced(call))
    }

    /// `$form->addX(name, label, items, ...)` becomes `$form->add(name, XType::class, [options])`.
    fn rewrite_field(&self, node: NodeId, method: &str, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        let Some(form_type) = Self::field_type(method) else {
            return Ok(RuleOutcome::Unchanged);
        };
        let choice = Self::choice_options(method);
        let args = call_args(ctx.tree(), node).to_vec();
        if args.is_empty() {
            return Ok(RuleOutcome::Unchanged);
        }

        let tree = ctx.tree_mut();
        let label = args.get(1).copied();
        let items = choice.and(args.get(2).copied());
        for &arg in &args[1..] {
            if Some(arg) == label || Some(arg) == items {
                tree.detach(node, arg)?;
            } else {
                tree.remove_child(node, arg)?;
            }
        }

        let mut options = Vec::new();
        if let Some(label) = label {
            options.push(("label", label));
        }
        if let Some(items) = items {
            options.push(("choices", items));
        }
        if let Some((expanded, multiple)) = choice {
            options.push(("expanded", tree.add(Syntax::Bool { value: expanded })));
            options.push(("multiple", tree.add(Syntax::Bool { value: multiple })));
        }
        if Self::MULTIPLE_METHODS.contains(&method) {
            options.push(("multiple", tree.add(Syntax::Bool { value: true })));
        }

        let type_ref = tree.add(Syntax::class_const(form_type, "class"));
        tree.push_child(node, type_ref)?;
        if !options.is_empty() {
            let mut entries = Vec::with_capacity(options.len());
            for (key, value) in options {
                let key = tree.add(Syntax::string(key));
                entries.push(tree.add_with_children(Syntax::ArrayItem { keyed: true }, vec![key, value])?);
            }
            let array = tree.add_with_children(Syntax::Array, entries)?;
            tree.push_child(node, array)?;
        }

        *tree.syntax_mut(node) = Syntax::method_call("add");
        tree.set_attr(node, AttributeKey::Processed, AttributeValue::Flag(true));
        debug!("Rewrote {}() at {} to add()", method, node);
        Ok(RuleOutcome::Mutated)
    }
}

impl Default for NetteFormToSymfonyForm {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteRule for NetteFormToSymfonyForm {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Migrate Nette forms in presenters to the Symfony form builder"
    }

    fn accepted_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::New, NodeKind::MethodCall]
    }

    fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        if ctx.tree().attributes().flag(node, AttributeKey::Processed) {
            return Ok(RuleOutcome::Unchanged);
        }
        if !ctx.matches(&self.in_presenter, node) {
            return Ok(RuleOutcome::Unchanged);
        }
        match ctx.tree().kind(node) {
            NodeKind::New if ctx.matches(&self.form_construction, node) => {
                self.rewrite_construction(node, ctx)
            }
            NodeKind::MethodCall if ctx.matches(&self.field_call, node) => {
                let method = ctx.tree().name(node).unwrap_or_default().to_string();
                self.rewrite_field(node, &method, ctx)
            }
            _ => Ok(RuleOutcome::Unchanged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_table() {
        assert_eq!(NetteFormToSymfonyForm::choice_options("addSelect"), Some((false, false)));
        assert_eq!(NetteFormToSymfonyForm::choice_options("addRadioList"), Some((true, false)));
        assert_eq!(NetteFormToSymfonyForm::choice_options("addCheckboxList"), Some((true, true)));
        assert_eq!(NetteFormToSymfonyForm::choice_options("addMultiSelect"), Some((false, true)));
        assert_eq!(NetteFormToSymfonyForm::choice_options("addText"), None);
    }

    #[test]
    fn test_field_types() {
        assert_eq!(
            NetteFormToSymfonyForm::field_type("addSubmit").as_deref(),
            Some("Symfony\\Component\\Form\\Extension\\Core\\Type\\SubmitType")
        );
        assert_eq!(NetteFormToSymfonyForm::field_type("addDateTime"), None);
        for (_, ty) in NetteFormToSymfonyForm::FIELD_TYPES {
            assert!(ty.ends_with("Type"));
        }
    }
}
