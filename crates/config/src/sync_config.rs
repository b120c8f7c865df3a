//! Sync loop configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between sync cycles, in seconds
pub const DEFAULT_SYNC_FREQUENCY_SECS: f64 = 10.0;

/// Default number of failed attempts before a pending change is flagged crashed
pub const DEFAULT_CRASHED_COUNT_WAIT: u32 = 10;

/// Default per-request timeout, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 30.0;

/// Defaults applied to every managed dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between two sync cycles; fractions are allowed
    pub sync_frequency_secs: f64,

    /// Failed attempts after which a pending change is marked crashed
    pub crashed_count_wait: u32,

    /// Seconds to wait for the remote before a cycle fails with `timeout`
    pub request_timeout_secs: f64,

    /// Start the sync loop as soon as a dataset is managed
    pub auto_sync: bool,
}

impl SyncSettings {
    /// Interval between cycles
    ///
    /// Values that are not a positive, representable duration fall back to
    /// the default.
    pub fn sync_frequency(&self) -> Duration {
        seconds_or(self.sync_frequency_secs, DEFAULT_SYNC_FREQUENCY_SECS)
    }

    /// Time allowed for one remote exchange
    pub fn request_timeout(&self) -> Duration {
        seconds_or(self.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS)
    }
}

fn seconds_or(value: f64, fallback: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if !duration.is_zero() => duration,
        _ => Duration::from_secs_f64(fallback),
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_frequency_secs: DEFAULT_SYNC_FREQUENCY_SECS,
            crashed_count_wait: DEFAULT_CRASHED_COUNT_WAIT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auto_sync: true,
        }
    }
}

impl ConfigSection for SyncSettings {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::positive_seconds(self.sync_frequency_secs, "sync.sync_frequency_secs"),
            Validator::in_range(self.crashed_count_wait, 1, 1000, "sync.crashed_count_wait"),
            Validator::positive_seconds(self.request_timeout_secs, "sync.request_timeout_secs"),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.sync_frequency_secs = other.sync_frequency_secs;
        self.crashed_count_wait = other.crashed_count_wait;
        self.request_timeout_secs = other.request_timeout_secs;
        self.auto_sync = other.auto_sync;
    }

    fn section_name(&self) -> &'static str {
        "sync"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.sync_frequency(), Duration::from_secs(10));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert!(settings.auto_sync);
    }

    #[test]
    fn test_fractional_frequency() {
        let settings = SyncSettings {
            sync_frequency_secs: 0.25,
            ..Default::default()
        };
        assert_eq!(settings.sync_frequency(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_rejected_and_clamped() {
        let settings = SyncSettings {
            sync_frequency_secs: 0.0,
            crashed_count_wait: 0,
            request_timeout_secs: f64::NAN,
            auto_sync: false,
        };

        assert_eq!(settings.validate().unwrap_err().len(), 3);
        assert_eq!(settings.sync_frequency(), Duration::from_secs(10));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_huge_values_fall_back_to_defaults() {
        let settings: SyncSettings =
            toml::from_str("sync_frequency_secs = 1e300\nrequest_timeout_secs = 1e300").unwrap();

        assert!(settings.validate().is_err());
        assert_eq!(settings.sync_frequency(), Duration::from_secs(10));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_section_name() {
        assert_eq!(SyncSettings::default().section_name(), "sync");
    }
}
