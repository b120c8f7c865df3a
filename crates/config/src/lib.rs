//! offsync configuration system
//!
//! Settings are grouped into sections that each implement [`ConfigSection`],
//! so a new concern can add its own block to `config.toml` without touching
//! the others.
//!
//! - **Sectioned**: `[app]`, `[sync]` and `[storage]` validate and merge independently
//! - **Forgiving loads**: missing fields fall back to their defaults
//! - **Atomic writes**: the config file is never left half-written
//! - **No panics**: every failure is a [`ConfigError`]
//!
//! # Example
//!
//! ```rust
//! use offsync_config::{Config, ConfigManager};
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let manager = ConfigManager::with_directory(dir.path().to_path_buf()).unwrap();
//! let config = manager.load_or_default();
//!
//! assert_eq!(config.sync.crashed_count_wait, 10);
//! ```

mod error;
mod manager;
mod persistence;
mod validation;

// Config sections
pub mod app_config;
pub mod storage_config;
pub mod sync_config;

pub use error::{ConfigError, ConfigResult, ValidationError};
pub use manager::{
    apply_overrides, ConfigManager, ENV_CRASHED_COUNT_WAIT, ENV_LOG_LEVEL, ENV_STORAGE_PATH,
    ENV_STORAGE_STRATEGY, ENV_SYNC_FREQUENCY_SECS,
};
pub use persistence::ConfigPersistence;
pub use validation::{ConfigSection, Validator};

pub use app_config::{AppConfig, LogLevel};
pub use storage_config::StorageConfig;
pub use sync_config::SyncSettings;

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    /// Application-level settings
    pub app: AppConfig,

    /// Default sync behaviour for managed datasets
    pub sync: SyncSettings,

    /// Where local replicas are persisted
    pub storage: StorageConfig,
}

impl Config {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the entire configuration
    ///
    /// Returns all validation errors found across all sections.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.app.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.sync.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.storage.validate() {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merges this config with another, preferring values from `other`
    ///
    /// Override chain: defaults < file < env vars < CLI args
    pub fn merge(&mut self, other: Config) {
        self.app.merge(other.app);
        self.sync.merge(other.sync);
        self.storage.merge(other.storage);
    }

    /// Renders the config as pretty JSON, for tooling that doesn't speak TOML
    pub fn to_json_pretty(&self) -> ConfigResult<String> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Json)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            app: AppConfig::default(),
            sync: SyncSettings::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_storage::StorageStrategy;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_version_is_set() {
        let config = Config::default();
        assert_eq!(config.version, CONFIG_VERSION);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        let mut override_config = Config::default();
        override_config.sync.crashed_count_wait = 3;
        override_config.storage.strategy = StorageStrategy::Disk;

        base.merge(override_config);
        assert_eq!(base.sync.crashed_count_wait, 3);
        assert_eq!(base.storage.strategy, StorageStrategy::Disk);
    }

    #[test]
    fn test_errors_collected_across_sections() {
        let mut config = Config::default();
        config.sync.crashed_count_wait = 0;
        config.sync.sync_frequency_secs = -1.0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[sync]\ncrashed_count_wait = 4\n").unwrap();
        assert_eq!(config.sync.crashed_count_wait, 4);
        assert_eq!(config.sync.sync_frequency_secs, 10.0);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_json_rendering() {
        let json = Config::default().to_json_pretty().unwrap();
        assert!(json.contains("\"crashed_count_wait\": 10"));
        assert!(json.contains("\"strategy\": \"memory\""));
    }
}
