//! Reading and writing `config.toml`
//!
//! Saves validate first, keep the previous file as `config.toml.backup`, and
//! replace the target through a temporary file in the same directory.

use crate::{Config, ConfigError, ConfigResult, CONFIG_VERSION};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Handles configuration file persistence
#[derive(Debug, Clone)]
pub struct ConfigPersistence {
    config_path: PathBuf,
}

impl ConfigPersistence {
    /// Creates a persistence handler for the given config file path
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Path of the managed file
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Path of the copy kept from the previous save
    pub fn backup_path(&self) -> PathBuf {
        self.config_path.with_extension("toml.backup")
    }

    /// Loads configuration from file
    ///
    /// A missing file yields the defaults. An empty or unparsable file is an
    /// error: silently replacing it would discard whatever the user meant.
    pub fn load(&self) -> ConfigResult<Config> {
        if !self.config_path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                self.config_path.display()
            );
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(&self.config_path).map_err(|e| ConfigError::Read {
                path: self.config_path.clone(),
                source: e,
            })?;

        if contents.trim().is_empty() {
            return Err(ConfigError::Read {
                path: self.config_path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Config file is empty or contains only whitespace",
                ),
            });
        }

        let config: Config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: self.config_path.clone(),
            source: e,
        })?;

        if config.version > CONFIG_VERSION {
            log::warn!(
                "Config version {} is newer than supported version {}, unknown keys are ignored",
                config.version,
                CONFIG_VERSION
            );
        }

        if let Err(errors) = config.validate() {
            let error_msg = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            // Invalid values are clamped where they are used; keep the file loadable
            log::warn!("Config validation warnings: {}", error_msg);
        }

        Ok(config)
    }

    /// Validates and writes the configuration atomically
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        config.validate().map_err(ConfigError::Invalid)?;

        let dir = self.parent_dir()?;
        ensure_directory_exists(dir)?;

        if self.config_path.exists() {
            fs::copy(&self.config_path, self.backup_path())
                .map_err(|source| ConfigError::Backup {
                    path: self.backup_path(),
                    source,
                })?;
        }

        let toml_string = toml::to_string_pretty(config)?;
        let temp_file = NamedTempFile::new_in(dir)?;
        self.write_atomic(temp_file, &toml_string)?;

        log::info!("Config saved to {}", self.config_path.display());
        Ok(())
    }

    fn parent_dir(&self) -> ConfigResult<&Path> {
        self.config_path
            .parent()
            .ok_or_else(|| ConfigError::NoParent(self.config_path.clone()))
    }

    fn write_atomic(&self, mut temp_file: NamedTempFile, content: &str) -> ConfigResult<()> {
        temp_file.write_all(content.as_bytes())?;
        temp_file.flush()?;

        temp_file
            .persist(&self.config_path)
            .map_err(|e| ConfigError::Write {
                path: self.config_path.clone(),
                source: e.error,
            })?;

        Ok(())
    }
}

fn ensure_directory_exists(path: &Path) -> ConfigResult<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| ConfigError::CreateDir {
            path: path.to_path_buf(),
            source: e,
        })?;
        log::info!("Created config directory: {}", path.display());
    }
    Ok(())
}
