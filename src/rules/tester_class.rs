//! Nette Tester test cases to PHPUnit test cases.
//!
//! ```php
//! require __DIR__ . '/bootstrap.php';              (removed)
//! Tester\Environment::setup();                      (removed)
//! class UserTest extends Tester\TestCase        =>  class UserTest extends PHPUnit\Framework\TestCase
//! (new UserTest)->run();                            (removed)
//! ```
//!
//! Bootstrap statements are only dropped from files declaring a Tester test
//! case. The parser hands `require`/`include` over as function calls.

use tracing::debug;

use crate::error::Result;
use crate::ir::attributes::{AttributeKey, AttributeValue};
use crate::ir::node::{NodeId, NodeKind, Syntax, Tree, normalize_class_name};
use crate::ir::rule::{RewriteRule, RuleContext, RuleOutcome};

const TESTER_TEST_CASE: &str = "Tester\\TestCase";
const TESTER_ENVIRONMENT: &str = "Tester\\Environment";
const PHPUNIT_TEST_CASE: &str = "PHPUnit\\Framework\\TestCase";

pub struct NetteTesterClassToPhpUnitClass;

impl NetteTesterClassToPhpUnitClass {
    pub const ID: &'static str = "nette_tester_class_to_phpunit_class";

    const BOOTSTRAP_FUNCTIONS: &'static [&'static str] = &["require", "require_once", "include", "include_once"];

    /// A test case class, before or after this rule rewrote it.
    fn is_test_class(ctx: &RuleContext<'_>, class: NodeId) -> bool {
        let tree = ctx.tree();
        let Syntax::Class {
            extends: Some(parent), ..
        } = tree.syntax(class)
        else {
            return false;
        };
        let parent = normalize_class_name(parent);
        tree.attributes().flag(class, AttributeKey::Processed)
            || parent == TESTER_TEST_CASE
            || ctx.oracle().is_subtype(parent, TESTER_TEST_CASE)
    }

    /// Qualified names of the test cases declared in the file.
    fn test_classes(ctx: &RuleContext<'_>) -> Vec<String> {
        let tree = ctx.tree();
        tree.descendants(tree.root())
            .into_iter()
            .filter(|c| tree.kind(*c) == NodeKind::Class && Self::is_test_class(ctx, *c))
            .filter_map(|c| tree.qualified_class_name(c))
            .collect()
    }

    fn is_top_level(tree: &Tree, statement: NodeId) -> bool {
        tree.parent(statement)
            .is_some_and(|p| matches!(tree.kind(p), NodeKind::File | NodeKind::Namespace))
    }

    /// `require ...`, `Tester\Environment::...()` or `(new SomeTest)->run()`.
    fn is_bootstrap(tree: &Tree, statement: NodeId, test_classes: &[String]) -> bool {
        let Some(expr) = tree.child(statement, 0) else {
            return false;
        };
        match tree.syntax(expr) {
            Syntax::FuncCall { name } => Self::BOOTSTRAP_FUNCTIONS.contains(&name.as_str()),
            Syntax::StaticCall { class, .. } => normalize_class_name(class) == TESTER_ENVIRONMENT,
            Syntax::MethodCall { name } if name == "run" => {
                tree.child(expr, 0).is_some_and(|receiver| match tree.syntax(receiver) {
                    Syntax::New { class } => {
                        let class = normalize_class_name(class);
                        test_classes.iter().any(|t| t == class)
                    }
                    _ => false,
                })
            }
            _ => false,
        }
    }

    fn rewrite_class(node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        match ctx.tree().syntax(node) {
            Syntax::Class {
                extends: Some(parent), ..
            } if normalize_class_name(parent) == TESTER_TEST_CASE => {}
            _ => return Ok(RuleOutcome::Unchanged),
        }
        let tree = ctx.tree_mut();
        if let Syntax::Class { extends, .. } = tree.syntax_mut(node) {
            *extends = Some(PHPUNIT_TEST_CASE.to_string());
        }
        tree.set_attr(node, AttributeKey::Processed, AttributeValue::Flag(true));
        debug!("Test case {} now extends {}", node, PHPUNIT_TEST_CASE);
        Ok(RuleOutcome::Mutated)
    }
}

impl RewriteRule for NetteTesterClassToPhpUnitClass {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Turn Nette Tester test cases into PHPUnit test cases"
    }

    fn accepted_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Class, NodeKind::Expression]
    }

    fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        if ctx.tree().kind(node) == NodeKind::Class {
            return Self::rewrite_class(node, ctx);
        }
        if !Self::is_top_level(ctx.tree(), node) {
            return Ok(RuleOutcome::Unchanged);
        }
        let test_classes = Self::test_classes(ctx);
        if test_classes.is_empty() || !Self::is_bootstrap(ctx.tree(), node, &test_classes) {
            return Ok(RuleOutcome::Unchanged);
        }
        debug!("Dropping tester bootstrap statement {}", node);
        Ok(RuleOutcome::Removed)
    }
}
