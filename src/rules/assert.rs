//! Nette Tester assertions to PHPUnit assertions.

use tracing::debug;

use crate::error::Result;
use crate::ir::matcher::call_args;
use crate::ir::node::{NodeId, NodeKind, Syntax, normalize_class_name};
use crate::ir::rule::{RewriteRule, RuleContext, RuleOutcome};
use crate::ir::types::ResolvedType;

const TESTER_ASSERT: &str = "Tester\\Assert";
const PHPUNIT_ASSERT: &str = "PHPUnit\\Framework\\Assert";

pub struct NetteAssertToPhpUnitAssert;

impl NetteAssertToPhpUnitAssert {
    pub const ID: &'static str = "nette_assert_to_phpunit_assert";

    /// Assertions with a direct PHPUnit counterpart and the same arguments.
    const RENAMES: &'static [(&'static str, &'static str)] = &[
        ("same", "assertSame"),
        ("notSame", "assertNotSame"),
        ("equal", "assertEquals"),
        ("notEqual", "assertNotEquals"),
        ("true", "assertTrue"),
        ("false", "assertFalse"),
        ("null", "assertNull"),
        ("notNull", "assertNotNull"),
        ("count", "assertCount"),
        ("nan", "assertNan"),
        ("match", "assertStringMatchesFormat"),
        ("matchFile", "assertStringMatchesFormatFile"),
    ];

    /// `Assert::type('<scalar>', $x)` targets.
    const SCALAR_TYPES: &'static [(&'static str, &'static str)] = &[
        ("string", "assertIsString"),
        ("int", "assertIsInt"),
        ("integer", "assertIsInt"),
        ("float", "assertIsFloat"),
        ("bool", "assertIsBool"),
        ("boolean", "assertIsBool"),
        ("array", "assertIsArray"),
        ("list", "assertIsArray"),
        ("callable", "assertIsCallable"),
        ("iterable", "assertIsIterable"),
        ("object", "assertIsObject"),
        ("scalar", "assertIsScalar"),
        ("resource", "assertIsResource"),
        ("null", "assertNull"),
    ];

    pub fn renamed(method: &str) -> Option<&'static str> {
        Self::RENAMES.iter().find(|(m, _)| *m == method).map(|(_, to)| *to)
    }

    fn is_tester_assert(ctx: &RuleContext<'_>, class: &str) -> bool {
        let class = normalize_class_name(class);
        class == TESTER_ASSERT || ctx.oracle().is_subtype(class, TESTER_ASSERT)
    }

    /// `contains` depends on the haystack: strings and iterables use different assertions.
    fn contains_target(ctx: &RuleContext<'_>, args: &[NodeId], negated: bool) -> Option<&'static str> {
        let haystack = *args.get(1)?;
        let resolved = ctx.resolved_type_of(haystack);
        if resolved.is_scalar("string") {
            Some(if negated {
                "assertStringNotContainsString"
            } else {
                "assertStringContainsString"
            })
        } else if resolved.is_scalar("array") || resolved.is_scalar("iterable") {
            Some(if negated { "assertNotContains" } else { "assertContains" })
        } else if let ResolvedType::Known(ty) = &resolved {
            ty.is_object().then_some(if negated { "assertNotContains" } else { "assertContains" })
        } else {
            None
        }
    }

    /// `type` turns into a scalar check (dropping the type argument) or `assertInstanceOf`.
    fn type_target(ctx: &RuleContext<'_>, args: &[NodeId]) -> Option<(&'static str, bool)> {
        let expected = *args.first()?;
        match ctx.tree().syntax(expected) {
            Syntax::String { value } => {
                let lower = value.to_ascii_lowercase();
                match Self::SCALAR_TYPES.iter().find(|(t, _)| *t == lower) {
                    Some((_, target)) => Some((*target, true)),
                    None => Some(("assertInstanceOf", false)),
                }
            }
            Syntax::ClassConstFetch { constant, .. } if constant == "class" => {
                Some(("assertInstanceOf", false))
            }
            _ => None,
        }
    }
}

impl RewriteRule for NetteAssertToPhpUnitAssert {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Migrate Nette Tester assertions to PHPUnit"
    }

    fn accepted_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::StaticCall]
    }

    fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        let Syntax::StaticCall { class, name } = ctx.tree().syntax(node) else {
            return Ok(RuleOutcome::Unchanged);
        };
        if !Self::is_tester_assert(ctx, class) {
            return Ok(RuleOutcome::Unchanged);
        }
        let method = name.clone();
        let args = call_args(ctx.tree(), node).to_vec();

        let (target, drop_first) = match method.as_str() {
            "contains" => match Self::contains_target(ctx, &args, false) {
                Some(target) => (target, false),
                None => return Ok(RuleOutcome::Unchanged),
            },
            "notContains" => match Self::contains_target(ctx, &args, true) {
                Some(target) => (target, false),
                None => return Ok(RuleOutcome::Unchanged),
            },
            "type" => match Self::type_target(ctx, &args) {
                Some(found) => found,
                None => return Ok(RuleOutcome::Unchanged),
            },
            other => match Self::renamed(other) {
                Some(target) => (target, false),
                None => return Ok(RuleOutcome::Unchanged),
            },
        };

        let tree = ctx.tree_mut();
        if drop_first {
            if let Some(&first) = args.first() {
                tree.remove_child(node, first)?;
            }
        }
        *tree.syntax_mut(node) = Syntax::StaticCall {
            class: PHPUNIT_ASSERT.to_string(),
            name: target.to_string(),
        };
        debug!("Rewrote Assert::{}() at {} to {}", method, node, target);
        Ok(RuleOutcome::Mutated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::Tree;
    use crate::ir::rule::AddedFile;
    use crate::ir::types::{ClassIndex, IndexedTypeOracle, TypeOracle, UnknownTypeOracle};
    use std::sync::Arc;

    fn assert_call(method: &str, args: Vec<Syntax>) -> (Tree, NodeId) {
        let mut tree = Tree::new(Syntax::File);
        let args: Vec<NodeId> = args.into_iter().map(|a| tree.add(a)).collect();
        let call = tree
            .add_with_children(
                Syntax::StaticCall {
                    class: "\\Tester\\Assert".into(),
                    name: method.into(),
                },
                args,
            )
            .unwrap();
        let stmt = tree.add_with_children(Syntax::Expression, vec![call]).unwrap();
        let root = tree.root();
        tree.push_child(root, stmt).unwrap();
        (tree, call)
    }

    fn apply_with(oracle: &dyn TypeOracle, tree: &mut Tree, node: NodeId) -> RuleOutcome {
        let mut files: Vec<AddedFile> = Vec::new();
        let mut ctx = RuleContext::new(tree, oracle, &mut files, 1);
        NetteAssertToPhpUnitAssert.apply(node, &mut ctx).unwrap()
    }

    fn apply(tree: &mut Tree, node: NodeId) -> RuleOutcome {
        apply_with(&UnknownTypeOracle, tree, node)
    }

    #[test]
    fn test_rename_is_idempotent() {
        let (mut tree, call) = assert_call("same", vec![Syntax::Int { value: 1 }, Syntax::variable("x")]);
        assert_eq!(apply(&mut tree, call), RuleOutcome::Mutated);
        assert_eq!(
            tree.syntax(call),
            &Syntax::StaticCall {
                class: PHPUNIT_ASSERT.into(),
                name: "assertSame".into()
            }
        );
        assert_eq!(tree.children(call).len(), 2);
        assert_eq!(apply(&mut tree, call), RuleOutcome::Unchanged);
    }

    #[test]
    fn test_scalar_type_drops_type_argument() {
        let (mut tree, call) = assert_call("type", vec![Syntax::string("string"), Syntax::variable("x")]);
        apply(&mut tree, call);
        assert_eq!(tree.name(call), Some("assertIsString"));
        assert_eq!(tree.children(call).len(), 1);
    }

    #[test]
    fn test_class_type_becomes_instance_of() {
        let (mut tree, call) = assert_call(
            "type",
            vec![Syntax::class_const("App\\Entity\\User", "class"), Syntax::variable("x")],
        );
        apply(&mut tree, call);
        assert_eq!(tree.name(call), Some("assertInstanceOf"));
        assert_eq!(tree.children(call).len(), 2);
    }

    #[test]
    fn test_contains_needs_a_known_haystack() {
        let (mut tree, call) = assert_call("contains", vec![Syntax::string("a"), Syntax::variable("x")]);
        assert_eq!(apply(&mut tree, call), RuleOutcome::Unchanged);

        let (mut tree, call) = assert_call("contains", vec![Syntax::string("a"), Syntax::string("abc")]);
        assert_eq!(apply(&mut tree, call), RuleOutcome::Unchanged);

        let oracle = IndexedTypeOracle::new(Arc::new(ClassIndex::new()));
        assert_eq!(apply_with(&oracle, &mut tree, call), RuleOutcome::Mutated);
        assert_eq!(tree.name(call), Some("assertStringContainsString"));
    }

    #[test]
    fn test_unknown_assertion_is_left_alone() {
        let (mut tree, call) = assert_call("exception", vec![]);
        assert_eq!(apply(&mut tree, call), RuleOutcome::Unchanged);
        assert_eq!(tree.name(call), Some("exception"));
    }
}
