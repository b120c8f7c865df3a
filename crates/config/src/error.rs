//! Errors raised while locating, reading, checking and writing `config.toml`

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read, or holds nothing
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot keep previous config as {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot create config directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot render config as TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Cannot render config as JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Saving was refused; every failing field is listed
    #[error("Refusing to save invalid config: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),

    #[error("{var}={value:?} is not a valid override")]
    EnvOverride { var: String, value: String },

    #[error("No config directory is known for this platform")]
    NoConfigDir,

    #[error("Config path {} has no parent directory", .0.display())]
    NoParent(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One bad field, addressed by its dotted path such as `sync.crashed_count_wait`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} {message}{}", got(.value))]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub value: Option<String>,
}

fn got(value: &Option<String>) -> String {
    value
        .as_deref()
        .map(|value| format!(" (got {})", value))
        .unwrap_or_default()
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        Self {
            value: Some(value.to_string()),
            ..Self::new(field, message)
        }
    }
}
