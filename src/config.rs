//! Engine configuration
//!
//! Resolution order (highest first):
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables (`CATALOG_TAXONOMY_*`)
//! 3. TOML config file
//! 4. Compiled defaults

use crate::batch::BatchOptions;
use crate::error::{EngineError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_DATABASE: &str = "CATALOG_TAXONOMY_DB";
pub const ENV_RULES: &str = "CATALOG_TAXONOMY_RULES";
pub const ENV_ERROR_THRESHOLD: &str = "CATALOG_TAXONOMY_ERROR_THRESHOLD";

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "catalog-taxonomy.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database path
    pub database: PathBuf,

    /// Rule registry JSON path
    pub rules: PathBuf,

    /// Batch aborts once errors exceed this
    pub error_threshold: usize,

    /// Error messages kept in a batch report
    pub max_error_messages: usize,

    /// Progress log interval, in items
    pub progress_every: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database: PathBuf::from("taxonomy.db"),
            rules: PathBuf::from("rules.json"),
            error_threshold: 50,
            max_error_messages: 10,
            progress_every: 500,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// File (explicit, or `catalog-taxonomy.toml` if present) then environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };

        config.apply_env_from(|key| std::env::var(key).ok())?;
        debug!(?config, "Configuration resolved");
        Ok(config)
    }

    /// Override fields from an environment lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database) = lookup(ENV_DATABASE) {
            self.database = PathBuf::from(database);
        }
        if let Some(rules) = lookup(ENV_RULES) {
            self.rules = PathBuf::from(rules);
        }
        if let Some(threshold) = lookup(ENV_ERROR_THRESHOLD) {
            self.error_threshold = threshold.trim().parse().map_err(|_| {
                EngineError::Config(format!("{} must be a non-negative integer, got '{}'", ENV_ERROR_THRESHOLD, threshold))
            })?;
        }
        Ok(())
    }

    pub fn batch_options(&self, dry_run: bool) -> BatchOptions {
        BatchOptions {
            error_threshold: self.error_threshold,
            max_error_messages: self.max_error_messages,
            progress_every: self.progress_every,
            dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.error_threshold, 50);
        assert_eq!(config.max_error_messages, 10);
        assert_eq!(config.database, PathBuf::from("taxonomy.db"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            database = "/var/lib/catalog/taxonomy.db"
            error_threshold = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.database, PathBuf::from("/var/lib/catalog/taxonomy.db"));
        assert_eq!(config.error_threshold, 5);
        assert_eq!(config.rules, PathBuf::from("rules.json"));
        assert_eq!(config.progress_every, 500);
    }

    #[test]
    fn test_invalid_toml() {
        let err = EngineConfig::from_toml_str("error_threshold = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::Toml(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rules = \"file-rules.json\"\nerror_threshold = 20").unwrap();
        let mut config = EngineConfig::from_file(file.path()).unwrap();

        let env: HashMap<&str, &str> = [(ENV_RULES, "env-rules.json"), (ENV_ERROR_THRESHOLD, " 3 ")]
            .into_iter()
            .collect();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.rules, PathBuf::from("env-rules.json"));
        assert_eq!(config.error_threshold, 3);
        assert_eq!(config.database, PathBuf::from("taxonomy.db"));
    }

    #[test]
    fn test_bad_env_threshold() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env_from(|key| (key == ENV_ERROR_THRESHOLD).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_batch_options() {
        let config = EngineConfig {
            error_threshold: 7,
            ..EngineConfig::default()
        };
        let options = config.batch_options(true);
        assert_eq!(options.error_threshold, 7);
        assert!(options.dry_run);
    }
}
