//! Nette Tester `.phpt` files become PHPUnit `*Test.php` files.
//!
//! The rule does not touch the tree: it asks for a new file next to the
//! original, named after its stem, with the original content.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::ir::attributes::{AttributeKey, AttributeValue};
use crate::ir::node::{NodeId, NodeKind};
use crate::ir::printer;
use crate::ir::rule::{AddedFile, RewriteRule, RuleContext, RuleOutcome};

pub struct RenameTesterTestToPhpUnitTestFile;

impl RenameTesterTestToPhpUnitTestFile {
    pub const ID: &'static str = "rename_tester_test_to_phpunit_test_file";

    /// `tests/SomeCase.phpt` -> `tests/SomeCaseTest.php`; `None` for other files.
    pub fn target_path(path: &Path) -> Option<PathBuf> {
        if path.extension().and_then(|e| e.to_str()) != Some("phpt") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let file_name = if stem.ends_with("Test") {
            format!("{}.php", stem)
        } else {
            format!("{}Test.php", stem)
        };
        Some(path.with_file_name(file_name))
    }
}

impl RewriteRule for RenameTesterTestToPhpUnitTestFile {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn description(&self) -> &'static str {
        "Create a PHPUnit test file for each Nette Tester .phpt file"
    }

    fn accepted_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::File]
    }

    fn apply(&self, node: NodeId, ctx: &mut RuleContext<'_>) -> Result<RuleOutcome> {
        let tree = ctx.tree();
        if node != tree.root() || tree.attributes().flag(node, AttributeKey::Processed) {
            return Ok(RuleOutcome::Unchanged);
        }
        let Some(target) = tree.path().and_then(Self::target_path) else {
            return Ok(RuleOutcome::Unchanged);
        };
        let content = match &tree.origin().source {
            Some(source) => source.to_string(),
            None => printer::format(tree)?,
        };

        debug!("Requesting {} from tester file", target.display());
        ctx.add_file(AddedFile {
            path: target,
            content,
        });
        ctx.tree_mut()
            .set_attr(node, AttributeKey::Processed, AttributeValue::Flag(true));
        Ok(RuleOutcome::Unchanged)
    }
}
