//! Run configuration, loaded from JSON and overridable from the command line.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ir::pipeline::PipelineConfig;
use crate::rules::route::RouteInfo;

fn default_max_passes() -> u32 {
    2
}

fn default_revisit_bound() -> u32 {
    1
}

/// Half the available cores, at least one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriterConfig {
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,
    #[serde(default = "default_revisit_bound")]
    pub revisit_bound: u32,
    /// Rule IDs to enable, in dispatch order. Empty enables every built-in rule.
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub routes: Vec<RouteInfo>,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        RewriterConfig {
            max_passes: default_max_passes(),
            revisit_bound: default_revisit_bound(),
            rules: Vec::new(),
            workers: default_workers(),
            routes: Vec::new(),
        }
    }
}

impl RewriterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RewriterConfig = serde_json::from_str(json).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("in config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_passes >= 1, "max_passes must be at least 1");
        anyhow::ensure!(self.workers >= 1, "workers must be at least 1");
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_passes: self.max_passes,
            revisit_bound: self.revisit_bound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RewriterConfig::from_json("{}").unwrap();
        assert_eq!(config.max_passes, 2);
        assert_eq!(config.revisit_bound, 1);
        assert!(config.rules.is_empty());
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_routes_and_rules() {
        let config = RewriterConfig::from_json(
            r#"{
                "max_passes": 1,
                "rules": ["explicit_route_annotation"],
                "routes": [{"class": "App\\HomeController", "method": "index", "path": "/"}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.pipeline_config().max_passes, 1);
        assert_eq!(config.routes[0].path, "/");
        assert!(config.routes[0].http_methods.is_empty());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(RewriterConfig::from_json(r#"{"max_passes": 0}"#).is_err());
        assert!(RewriterConfig::from_json(r#"{"unknown": true}"#).is_err());
    }
}
