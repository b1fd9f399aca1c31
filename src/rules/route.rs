//! Explicit `@Route` annotations on controller actions.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::ir::attributes::{AttributeKey, AttributeValue};
use crate::ir::matcher::enclosing_class;
use crate::ir::node::{NodeId, NodeKind, Syntax, Tree, normalize_class_name};
use crate::ir::rule::{RewriteRule, RuleContext, RuleOutcome};

const ROUTE_ANNOTATION: &str = "Symfony\\Component\\Routing\\Annotation\\Route";

/// A route to declare on `class::method`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub class: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub http_methods: Vec<String>,
}

pub struct ExplicitRouteAnnotation {
    routes: Vec<RouteInfo>,
}

impl ExplicitRouteAnnotation {
    pub const ID: &'static str = "explicit_route_annotation";

    pub fn new(routes: Vec<RouteInfo>) -> Self {
        Self { routes }
    }

    fn route_for(&self, tree: &Tree, method: NodeId) -> Option<&RouteInfo> {
        let name = tree.name(method)?;
        let class = enclosing_class(tree, method).and_then(|c| tree.qualified_class_name(c))?;
        self.routes
            .iter()
            .find(|r| r.method == name && normalize_class_name(&r.class) == class)
    }

    fn has_route_annotation(tree: &Tree, method: NodeId) -> bool {
        tree.children(method).iter().any(|c| match tree.syntax(*c) {
            Syntax::Annotation { name } => normalize_class_name(name) == ROUTE_ANNOTATION,
            _ => false,
        })
    }

    /// Builds `@Route("<path>", methods={"GET", ...})`.
    fn build_annotation(tree: &mut Tree, route: &RouteInfo) -> Result<NodeId> {
        let mut args = vec![tree.add(Syntax::string(route.path.clone()))];
        if !route.http_methods.is_empty() {
            let mut items = Vec::with_capacity(route.http_methods.len());
            for method in &route.http_methods {
                let value = tree.add(Syntax::string(method.to_ascii_uppercase()));
                items.push(tree.add_with_children(Syntax::ArrayItem { keyed: false }, vec![value])?);
            }
            let key = tree.add(Syntax::string("methods"));
            let list = tree.add_with_children(Syntax::Array, items)?;
            args.push(tree.add_with_children(Syntax::ArrayItem { keyed: true }, vec![key, list])?);
        }
        tree.add_with_children(
            Syntax::Annotation {
                name: ROUTE_ANNOTATION.to_string(),
            },
            args,
        )
    }
}

impl RewriteRule for ExplicitRouteAnnotation {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Declare configured routes as Symfony @Route annotations"
    }

    fn accepted_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::ClassMethod]
    }

    fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        let tree = ctx.tree();
        if tree.attributes().flag(node, AttributeKey::HasRouteAnnotation) {
            return Ok(RuleOutcome::Unchanged);
        }
        if Self::has_route_annotation(tree, node) {
            ctx.tree_mut()
                .set_attr(node, AttributeKey::HasRouteAnnotation, AttributeValue::Flag(true));
            return Ok(RuleOutcome::Unchanged);
        }
        let Some(route) = self.route_for(tree, node).cloned() else {
            return Ok(RuleOutcome::Unchanged);
        };

        let tree = ctx.tree_mut();
        let annotation = Self::build_annotation(tree, &route)?;
        tree.insert_child(node, 0, annotation)?;
        tree.set_attr(node, AttributeKey::HasRouteAnnotation, AttributeValue::Flag(true));
        debug!("Added route {} to {}::{}", route.path, route.class, route.method);
        Ok(RuleOutcome::Mutated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::printer;
    use crate::ir::types::UnknownTypeOracle;

    fn controller() -> (Tree, NodeId) {
        let mut tree = Tree::new(Syntax::File);
        let method = tree.add(Syntax::ClassMethod { name: "actionDetail".into() });
        let class = tree
            .add_with_children(
                Syntax::Class {
                    name: "ProductController".into(),
                    extends: None,
                    implements: vec![],
                },
                vec![method],
            )
            .unwrap();
        let ns = tree
            .add_with_children(Syntax::Namespace { name: "App\\Controller".into() }, vec![class])
            .unwrap();
        let root = tree.root();
        tree.push_child(root, ns).unwrap();
        (tree, method)
    }

    fn rule() -> ExplicitRouteAnnotation {
        ExplicitRouteAnnotation::new(vec![RouteInfo {
            class: "\\App\\Controller\\ProductController".into(),
            method: "actionDetail".into(),
            path: "/product/{id}".into(),
            http_methods: vec!["get".into()],
        }])
    }

    #[test]
    fn test_annotation_added_once() {
        let (mut tree, method) = controller();
        let rule = rule();
        let mut files = Vec::new();
        let mut ctx = RuleContext::new(&mut tree, &UnknownTypeOracle, &mut files, 1);
        assert_eq!(rule.apply(method, &mut ctx).unwrap(), RuleOutcome::Mutated);
        assert_eq!(rule.apply(method, &mut ctx).unwrap(), RuleOutcome::Unchanged);

        let annotation = tree.child(method, 0).unwrap();
        assert_eq!(tree.name(annotation), Some(ROUTE_ANNOTATION));
        assert_eq!(tree.children(method).len(), 1);
        assert!(printer::format(&tree).unwrap().contains(
            r#"@\Symfony\Component\Routing\Annotation\Route("/product/{id}", methods={"GET"})"#
        ));
    }

    #[test]
    fn test_unconfigured_method_is_untouched() {
        let (mut tree, method) = controller();
        let rule = ExplicitRouteAnnotation::new(vec![]);
        let mut files = Vec::new();
        let mut ctx = RuleContext::new(&mut tree, &UnknownTypeOracle, &mut files, 1);
        assert_eq!(rule.apply(method, &mut ctx).unwrap(), RuleOutcome::Unchanged);
        assert!(tree.children(method).is_empty());
    }
}
