//! Configuration manager - main API for config operations

use crate::persistence::ConfigPersistence;
use crate::{Config, ConfigError, ConfigResult, LogLevel};
use directories::ProjectDirs;
use offsync_storage::StorageStrategy;
use std::path::PathBuf;

/// Environment variables recognised by [`ConfigManager::load_with_env_overrides`]
pub const ENV_SYNC_FREQUENCY_SECS: &str = "OFFSYNC_SYNC_FREQUENCY_SECS";
pub const ENV_CRASHED_COUNT_WAIT: &str = "OFFSYNC_CRASHED_COUNT_WAIT";
pub const ENV_STORAGE_PATH: &str = "OFFSYNC_STORAGE_PATH";
pub const ENV_STORAGE_STRATEGY: &str = "OFFSYNC_STORAGE_STRATEGY";
pub const ENV_LOG_LEVEL: &str = "OFFSYNC_LOG_LEVEL";

/// Main configuration manager
///
/// Owns the location of `config.toml` and exposes load/save/update on top of
/// [`ConfigPersistence`].
pub struct ConfigManager {
    persistence: ConfigPersistence,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a config manager using the platform config directory
    ///
    /// - Linux: `~/.config/offsync/`
    /// - macOS: `~/Library/Application Support/offsync/`
    /// - Windows: `%APPDATA%\offsync\`
    pub fn new() -> ConfigResult<Self> {
        let config_dir = Self::default_config_dir()?;
        Self::with_directory(config_dir)
    }

    /// Creates a config manager with a custom config directory
    pub fn with_directory(config_dir: PathBuf) -> ConfigResult<Self> {
        let persistence = ConfigPersistence::new(config_dir.join("config.toml"));

        Ok(Self {
            persistence,
            config_dir,
        })
    }

    fn default_config_dir() -> ConfigResult<PathBuf> {
        ProjectDirs::from("", "", "offsync")
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the config directory path
    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    /// Returns the full config file path
    pub fn config_path(&self) -> PathBuf {
        self.persistence.path().to_path_buf()
    }

    /// Loads the configuration from file
    pub fn load(&self) -> ConfigResult<Config> {
        self.persistence.load()
    }

    /// Loads the configuration, falling back to defaults on any error
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                Config::default()
            }
        }
    }

    /// Validates and saves the configuration
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        self.persistence.save(config)
    }

    /// Loads, modifies and saves the configuration in one step
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use offsync_config::ConfigManager;
    /// # let manager = ConfigManager::new().unwrap();
    /// manager.update(|config| {
    ///     config.sync.sync_frequency_secs = 5.0;
    /// }).expect("Failed to update config");
    /// ```
    pub fn update<F>(&self, update_fn: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.load()?;
        update_fn(&mut config);
        self.save(&config)
    }

    /// Writes a default config file if none exists
    ///
    /// Returns `Ok(true)` when a file was created.
    pub fn initialize(&self) -> ConfigResult<bool> {
        if self.config_path().exists() {
            log::info!(
                "Config file already exists at {}",
                self.config_path().display()
            );
            return Ok(false);
        }

        self.save(&Config::default())?;
        log::info!("Generated default config at {}", self.config_path().display());
        Ok(true)
    }

    /// Overwrites the config file with defaults
    pub fn reset(&self) -> ConfigResult<()> {
        self.save(&Config::default())
    }

    /// Returns every validation problem in the current file
    pub fn validate(&self) -> ConfigResult<Vec<String>> {
        let config = self.load()?;

        match config.validate() {
            Ok(()) => Ok(Vec::new()),
            Err(errors) => Ok(errors.iter().map(|e| e.to_string()).collect()),
        }
    }

    /// Loads the file, then applies `OFFSYNC_*` environment overrides
    pub fn load_with_env_overrides(&self) -> ConfigResult<Config> {
        let mut config = self.load()?;
        apply_overrides(&mut config, |name| std::env::var(name).ok())?;

        if let Err(errors) = config.validate() {
            log::warn!(
                "Config validation warnings after env overrides: {:?}",
                errors
            );
        }

        Ok(config)
    }
}

/// Applies overrides from `lookup`, which maps a variable name to its value
///
/// A variable that is set but unparsable is an error rather than being
/// silently ignored.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_SYNC_FREQUENCY_SECS) {
        config.sync.sync_frequency_secs = parse_env(ENV_SYNC_FREQUENCY_SECS, &value)?;
    }

    if let Some(value) = lookup(ENV_CRASHED_COUNT_WAIT) {
        config.sync.crashed_count_wait = parse_env(ENV_CRASHED_COUNT_WAIT, &value)?;
    }

    if let Some(value) = lookup(ENV_STORAGE_STRATEGY) {
        config.storage.strategy = parse_env::<StorageStrategy>(ENV_STORAGE_STRATEGY, &value)?;
    }

    if let Some(value) = lookup(ENV_STORAGE_PATH) {
        config.storage.path = Some(PathBuf::from(value));
    }

    if let Some(value) = lookup(ENV_LOG_LEVEL) {
        config.app.log_level = parse_env::<LogLevel>(ENV_LOG_LEVEL, &value)?;
    }

    Ok(())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse::<T>().map_err(|_| ConfigError::EnvOverride {
        var: var.to_string(),
        value: value.to_string(),
    })
}
