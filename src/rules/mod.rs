//! Built-in Nette to Symfony migration rules.

pub mod assert;
pub mod control;
pub mod form;
pub mod request_parameter;
pub mod route;
pub mod tester_class;
pub mod tester_file;

use std::sync::Arc;

use crate::config::RewriterConfig;
use crate::error::{Result, RewriteError};
use crate::ir::rule::RewriteRule;

pub use assert::NetteAssertToPhpUnitAssert;
pub use control::NetteControlToSymfonyController;
pub use form::NetteFormToSymfonyForm;
pub use request_parameter::FromRequestGetParameterToAttributesGet;
pub use route::{ExplicitRouteAnnotation, RouteInfo};
pub use tester_class::NetteTesterClassToPhpUnitClass;
pub use tester_file::RenameTesterTestToPhpUnitTestFile;

/// Canonical order of the built-in rules.
pub const BUILTIN_RULES: &[&str] = &[
    NetteFormToSymfonyForm::ID,
    NetteAssertToPhpUnitAssert::ID,
    NetteTesterClassToPhpUnitClass::ID,
    FromRequestGetParameterToAttributesGet::ID,
    NetteControlToSymfonyController::ID,
    RenameTesterTestToPhpUnitTestFile::ID,
    ExplicitRouteAnnotation::ID,
];

/// Instantiates one built-in rule by ID.
pub fn by_id(id: &str, config: &RewriterConfig) -> Result<Arc<dyn RewriteRule>> {
    let rule: Arc<dyn RewriteRule> = match id {
        NetteFormToSymfonyForm::ID => Arc::new(NetteFormToSymfonyForm::new()),
        NetteAssertToPhpUnitAssert::ID => Arc::new(NetteAssertToPhpUnitAssert),
        NetteTesterClassToPhpUnitClass::ID => Arc::new(NetteTesterClassToPhpUnitClass),
        FromRequestGetParameterToAttributesGet::ID => Arc::new(FromRequestGetParameterToAttributesGet::new()),
        NetteControlToSymfonyController::ID => Arc::new(NetteControlToSymfonyController),
        RenameTesterTestToPhpUnitTestFile::ID => Arc::new(RenameTesterTestToPhpUnitTestFile),
        ExplicitRouteAnnotation::ID => Arc::new(ExplicitRouteAnnotation::new(config.routes.clone())),
        other => return Err(RewriteError::UnknownRule(other.to_string())),
    };
    Ok(rule)
}

/// Every built-in rule in canonical order.
pub fn builtin(config: &RewriterConfig) -> Vec<Arc<dyn RewriteRule>> {
    BUILTIN_RULES
        .iter()
        .filter_map(|id| by_id(id, config).ok())
        .collect()
}

/// The named rules in the given order, or every built-in rule when `ids` is empty.
pub fn select(ids: &[String], config: &RewriterConfig) -> Result<Vec<Arc<dyn RewriteRule>>> {
    if ids.is_empty() {
        return Ok(builtin(config));
    }
    ids.iter().map(|id| by_id(id, config)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_order() {
        let rules = builtin(&RewriterConfig::default());
        let ids: Vec<&str> = rules.iter().map(|r| r.id()).collect();
        assert_eq!(ids, BUILTIN_RULES);
    }

    #[test]
    fn test_select() {
        let config = RewriterConfig::default();
        let rules = select(&["nette_assert_to_phpunit_assert".to_string()], &config).unwrap();
        assert_eq!(rules.len(), 1);

        let ids = [
            "nette_control_to_symfony_controller".to_string(),
            "request_get_parameter_to_attributes_get".to_string(),
            "nette_tester_class_to_phpunit_class".to_string(),
        ];
        let rules = select(&ids, &config).unwrap();
        let selected: Vec<&str> = rules.iter().map(|r| r.id()).collect();
        assert_eq!(selected, ids);

        let err = select(&["no_such_rule".to_string()], &config).err().unwrap();
        assert_eq!(err, RewriteError::UnknownRule("no_such_rule".to_string()));
    }
}
