//! Configuration file loading and normalization.
//!
//! The data-only engine options can come from a `.weftrc.json` file. Older
//! option spellings (`maxDepth`, `context`) are accepted here as serde
//! aliases and normalized into the one canonical [`Options`] struct; nothing
//! deeper in the engine ever branches on an alias.

use std::collections::BTreeMap;
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::document::{DEFAULT_MAX_EVALUATION_DEPTH, Options};
use crate::core::variant::VariantContext;

pub const CONFIG_FILE_NAME: &str = ".weftrc.json";

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_max_depth", alias = "maxDepth")]
    pub max_evaluation_depth: usize,

    /// Default variant context applied to every read.
    #[serde(default, alias = "context")]
    pub default_context: BTreeMap<String, String>,

    /// Dimension names honored during variant scoring; absent means all.
    #[serde(default)]
    pub allowed_dimensions: Option<Vec<String>>,

    /// Value substituted when evaluation fails recoverably.
    #[serde(default)]
    pub fallback: Option<Value>,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_EVALUATION_DEPTH
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_evaluation_depth: default_max_depth(),
            default_context: BTreeMap::new(),
            allowed_dimensions: None,
            fallback: None,
        }
    }
}

impl EngineConfig {
    /// Normalize into the canonical options struct. Resolvers, hooks and
    /// validators cannot come from a file and stay at their defaults.
    pub fn into_options(self) -> Options {
        let mut options = Options::default().with_max_evaluation_depth(self.max_evaluation_depth);
        if !self.default_context.is_empty() {
            options = options
                .with_default_context(self.default_context.into_iter().collect::<VariantContext>());
        }
        if let Some(dimensions) = self.allowed_dimensions {
            options = options.with_allowed_dimensions(dimensions);
        }
        if let Some(fallback) = self.fallback {
            options = options.with_fallback(fallback);
        }
        options
    }
}

pub fn default_config_json() -> Result<String> {
    let config = EngineConfig::default();
    serde_json::to_string_pretty(&config).context("Failed to generate default config.")
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Walk up from `start_dir` to the nearest config file, stopping at a `.git`
/// boundary.
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }
        if current.join(".git").exists() {
            return None;
        }
        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_evaluation_depth, 10);
        assert!(config.default_context.is_empty());
        assert!(config.allowed_dimensions.is_none());
        assert!(config.fallback.is_none());
    }

    #[test]
    fn test_canonical_names() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "maxEvaluationDepth": 4,
                "defaultContext": {"lang": "es"},
                "allowedDimensions": ["lang", "form"],
                "fallback": "n/a"
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_evaluation_depth, 4);
        assert_eq!(
            config.default_context.get("lang").map(String::as_str),
            Some("es")
        );
    }

    #[test]
    fn test_legacy_aliases_normalize() {
        // Older configs spelled these options differently.
        let config: EngineConfig =
            serde_json::from_str(r#"{"maxDepth": 7, "context": {"lang": "fr"}}"#).unwrap();
        assert_eq!(config.max_evaluation_depth, 7);
        let options = config.into_options();
        assert_eq!(options.max_evaluation_depth, 7);
        assert_eq!(options.default_context.get("lang"), Some("fr"));
    }

    #[test]
    fn test_default_config_round_trips() {
        let json = default_config_json().unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_evaluation_depth, 10);
    }

    #[test]
    fn test_find_config_file() {
        use std::io::Write;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let mut file = fs::File::create(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        write!(file, "{{}}").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert!(found.ends_with(CONFIG_FILE_NAME));
    }
}
