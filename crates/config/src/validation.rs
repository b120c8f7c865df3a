//! Validation helpers shared by config sections

pub use crate::error::ValidationError;
use std::path::Path;
use std::time::Duration;

/// A block of `config.toml` that can check and merge itself
///
/// Adding a section means implementing this trait and adding a field to
/// [`crate::Config`]; nothing else in the loader needs to change.
pub trait ConfigSection: Default {
    /// Returns every problem found in the section
    fn validate(&self) -> Result<(), Vec<ValidationError>>;

    /// Merges another section into this one, `other` wins
    fn merge(&mut self, other: Self);

    /// Section name as it appears in the TOML file
    fn section_name(&self) -> &'static str;
}

/// Common validators for config values
pub struct Validator;

impl Validator {
    /// Validates that a numeric value is within an inclusive range
    pub fn in_range<T>(value: T, min: T, max: T, field: &str) -> Result<(), ValidationError>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if value < min || value > max {
            Err(ValidationError::with_value(
                field,
                format!("must be between {} and {}", min, max),
                value,
            ))
        } else {
            Ok(())
        }
    }

    /// Validates that a duration given in seconds is strictly positive and
    /// fits in a `Duration`
    pub fn positive_seconds(value: f64, field: &str) -> Result<(), ValidationError> {
        if value <= 0.0 || Duration::try_from_secs_f64(value).is_err() {
            Err(ValidationError::with_value(
                field,
                "must be a positive number of seconds",
                value,
            ))
        } else {
            Ok(())
        }
    }

    /// Validates that a string is not blank
    pub fn not_empty(value: &str, field: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            Err(ValidationError::new(field, "must not be empty"))
        } else {
            Ok(())
        }
    }

    /// Validates that an optional path, when given, is not empty
    pub fn optional_path(path: Option<&Path>, field: &str) -> Result<(), ValidationError> {
        match path {
            Some(p) if p.as_os_str().is_empty() => {
                Err(ValidationError::new(field, "must not be empty when set"))
            }
            _ => Ok(()),
        }
    }

    /// Collects multiple validation results into a single result
    pub fn collect_errors(
        results: Vec<Result<(), ValidationError>>,
    ) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<ValidationError> = results.into_iter().filter_map(|r| r.err()).collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
