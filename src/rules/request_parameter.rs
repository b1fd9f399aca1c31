//! Nette request parameters to Symfony request attributes.
//!
//! ```php
//! $request->getParameter('id');   =>   $request->attributes->get('id');
//! ```

use tracing::debug;

use crate::error::Result;
use crate::ir::matcher::{self, Predicate};
use crate::ir::node::{NodeId, NodeKind, Syntax};
use crate::ir::rule::{RewriteRule, RuleContext, RuleOutcome};

const NETTE_REQUEST: &str = "Nette\\Application\\Request";

pub struct FromRequestGetParameterToAttributesGet {
    get_parameter: Predicate,
}

impl FromRequestGetParameterToAttributesGet {
    pub const ID: &'static str = "request_get_parameter_to_attributes_get";

    pub fn new() -> Self {
        FromRequestGetParameterToAttributesGet {
            get_parameter: matcher::call_named(&["getParameter"])
                .and(matcher::receiver_instance_of(NETTE_REQUEST)),
        }
    }
}

impl Default for FromRequestGetParameterToAttributesGet {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteRule for FromRequestGetParameterToAttributesGet {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Read Nette request parameters from Symfony request attributes"
    }

    fn accepted_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::MethodCall]
    }

    fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        if !ctx.matches(&self.get_parameter, node) {
            return Ok(RuleOutcome::Unchanged);
        }
        let tree = ctx.tree_mut();
        let Some(receiver) = tree.child(node, 0) else {
            return Ok(RuleOutcome::Unchanged);
        };
        tree.detach(node, receiver)?;
        let attributes = tree.add_with_children(
            Syntax::PropertyFetch {
                name: "attributes".to_string(),
            },
            vec![receiver],
        )?;
        tree.insert_child(node, 0, attributes)?;
        *tree.syntax_mut(node) = Syntax::method_call("get");
        debug!("Rewrote getParameter() at {} to attributes->get()", node);
        Ok(RuleOutcome::Mutated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::printer;
    use crate::ir::types::{ClassEntry, ClassIndex, IndexedTypeOracle, TypeOracle, UnknownTypeOracle};
    use crate::ir::node::Tree;
    use std::sync::Arc;

    /// `$this->getRequest()->getParameter('id')` inside a presenter.
    fn parameter_call() -> (Tree, NodeId) {
        let mut tree = Tree::new(Syntax::File);
        let this = tree.add(Syntax::variable("this"));
        let request = tree
            .add_with_children(Syntax::method_call("getRequest"), vec![this])
            .unwrap();
        let id = tree.add(Syntax::string("id"));
        let call = tree
            .add_with_children(Syntax::method_call("getParameter"), vec![request, id])
            .unwrap();
        let stmt = tree.add_with_children(Syntax::Expression, vec![call]).unwrap();
        let method = tree
            .add_with_children(Syntax::ClassMethod { name: "actionDetail".into() }, vec![stmt])
            .unwrap();
        let class = tree
            .add_with_children(
                Syntax::Class {
                    name: "ProductPresenter".into(),
                    extends: Some("Nette\\Application\\UI\\Presenter".into()),
                    implements: vec![],
                },
                vec![method],
            )
            .unwrap();
        let root = tree.root();
        tree.push_child(root, class).unwrap();
        (tree, call)
    }

    fn oracle() -> IndexedTypeOracle {
        let index = ClassIndex::new().with_class(
            "Nette\\Application\\UI\\Presenter",
            ClassEntry::new().method("getRequest", NETTE_REQUEST),
        );
        IndexedTypeOracle::new(Arc::new(index))
    }

    fn apply(oracle: &dyn TypeOracle, tree: &mut Tree, node: NodeId) -> RuleOutcome {
        let mut files = Vec::new();
        let mut ctx = RuleContext::new(tree, oracle, &mut files, 1);
        FromRequestGetParameterToAttributesGet::new().apply(node, &mut ctx).unwrap()
    }

    #[test]
    fn test_parameter_read_from_attributes() {
        let (mut tree, call) = parameter_call();
        let oracle = oracle();
        assert_eq!(apply(&oracle, &mut tree, call), RuleOutcome::Mutated);
        assert_eq!(
            printer::format_expression(&tree, call),
            "$this->getRequest()->attributes->get('id')"
        );
        assert_eq!(apply(&oracle, &mut tree, call), RuleOutcome::Unchanged);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_untyped_receiver_is_left_alone() {
        let (mut tree, call) = parameter_call();
        assert_eq!(apply(&UnknownTypeOracle, &mut tree, call), RuleOutcome::Unchanged);
        assert_eq!(tree.name(call), Some("getParameter"));
    }
}
