//! Query compiler configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FTMQ_TABLE` | ftm | Base entity table |
//! | `FTMQ_DEFAULT_LIMIT` | 100 | Page size, also the cap for unauthenticated requests |
//! | `FTMQ_MIN_SEARCH_LENGTH` | 4 | Minimum search term length |
//! | `FTMQ_MODEL_PATH` | | JSON model document, bundled model when unset |
//! | `FTMQ_DATABASE_URL` | | sqlite connection string |
//! | `FTMQ_LOG_LEVEL` | info | Log level |

use crate::error::Result;
use crate::registry::{ModelRegistry, PropertyRegistry};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Parser)]
#[command(name = "ftmq-compile")]
#[command(about = "Compile FollowTheMoney entity queries to SQL")]
pub struct QueryConfig {
    /// Base entity table.
    #[arg(long, env = "FTMQ_TABLE", default_value = "ftm")]
    pub table: String,

    /// Default page size.
    #[arg(long, env = "FTMQ_DEFAULT_LIMIT", default_value = "100")]
    pub default_limit: i64,

    /// Minimum length of a search term.
    #[arg(long, env = "FTMQ_MIN_SEARCH_LENGTH", default_value = "4")]
    pub min_search_length: usize,

    /// Model document with schemata and property types.
    #[arg(long, env = "FTMQ_MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Database connection string.
    #[arg(long, env = "FTMQ_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "FTMQ_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            table: "ftm".to_string(),
            default_limit: 100,
            min_search_length: 4,
            model_path: None,
            database_url: None,
            log_level: "info".to_string(),
        }
    }
}

impl QueryConfig {
    /// Configuration from environment variables only
    pub fn from_env() -> Self {
        Self::try_parse_from(["ftmq-compile"]).unwrap_or_default()
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.table.is_empty() {
            errors.push("Table name cannot be empty".to_string());
        }

        if self.default_limit <= 0 {
            errors.push("Default limit must be positive".to_string());
        }

        if self.min_search_length == 0 {
            errors.push("Minimum search length cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Configuration for tests, with an in-memory database
    pub fn for_testing() -> Self {
        Self {
            table: "ftm_test".to_string(),
            database_url: Some("sqlite::memory:".to_string()),
            log_level: "debug".to_string(),
            ..Default::default()
        }
    }

    /// Load the configured model, or the bundled one
    pub fn load_registry(&self) -> Result<Arc<dyn PropertyRegistry>> {
        let registry = match &self.model_path {
            Some(path) => ModelRegistry::from_path(path)?,
            None => ModelRegistry::bundled()?,
        };
        Ok(Arc::new(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueryConfig::default();
        assert_eq!(config.table, "ftm");
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.min_search_length, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = QueryConfig {
            default_limit: 0,
            min_search_length: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_parse_args() {
        let config = QueryConfig::try_parse_from([
            "ftmq-compile",
            "--table",
            "ftm_other",
            "--default-limit",
            "25",
        ])
        .unwrap();
        assert_eq!(config.table, "ftm_other");
        assert_eq!(config.default_limit, 25);
    }

    #[test]
    fn test_for_testing() {
        let config = QueryConfig::for_testing();
        assert_eq!(config.table, "ftm_test");
        assert!(config.validate().is_ok());
        let registry = config.load_registry().unwrap();
        assert!(registry.is_known_property("name"));
        assert!(registry.is_numeric("amount"));
    }
}
