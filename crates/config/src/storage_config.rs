//! Local storage configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use offsync_storage::{default_storage_path, StorageStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where local replicas live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend used for every managed dataset
    pub strategy: StorageStrategy,

    /// Directory (disk) or database file (sqlite); ignored for memory
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Path the selected backend will actually use
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_storage_path(self.strategy))
    }
}

impl ConfigSection for StorageConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![Validator::optional_path(
            self.path.as_deref(),
            "storage.path",
        )])
    }

    fn merge(&mut self, other: Self) {
        self.strategy = other.strategy;
        if other.path.is_some() {
            self.path = other.path;
        }
    }

    fn section_name(&self) -> &'static str {
        "storage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_memory() {
        let config = StorageConfig::default();
        assert_eq!(config.strategy, StorageStrategy::Memory);
        assert!(config.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_path_invalid() {
        let config = StorageConfig {
            strategy: StorageStrategy::Disk,
            path: Some(PathBuf::new()),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_keeps_path_when_other_unset() {
        let mut base = StorageConfig {
            strategy: StorageStrategy::Disk,
            path: Some(PathBuf::from("/data/offsync")),
        };
        base.merge(StorageConfig {
            strategy: StorageStrategy::Sqlite,
            path: None,
        });

        assert_eq!(base.strategy, StorageStrategy::Sqlite);
        assert_eq!(base.resolved_path(), PathBuf::from("/data/offsync"));
    }

    #[test]
    fn test_resolved_path_defaults_per_strategy() {
        let config = StorageConfig {
            strategy: StorageStrategy::Sqlite,
            path: None,
        };
        assert_eq!(config.resolved_path(), PathBuf::from("offsync.db"));
    }

    #[test]
    fn test_toml_strategy_tag() {
        let config: StorageConfig = toml::from_str("strategy = \"disk\"\npath = \"/tmp/x\"").unwrap();
        assert_eq!(config.strategy, StorageStrategy::Disk);
        assert_eq!(config.path, Some(PathBuf::from("/tmp/x")));
    }
}
