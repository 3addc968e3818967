//! Shared threshold validation helpers.
//!
//! Range checks used when loading the agent configuration.

use crate::error::CoreError;

/// Validate that a fraction falls within `(0.0, 1.0]`.
///
/// Used for the memory fraction given to the workload; zero would size an
/// empty matrix, so it is rejected along with anything above one.
pub fn validate_fraction(value: f64, name: &str) -> Result<(), CoreError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(CoreError::Validation(format!(
            "{name} must be greater than 0.0 and at most 1.0, got {value}"
        )));
    }
    Ok(())
}

/// Validate that a percentage falls within `[0.0, 100.0]`.
pub fn validate_percent(value: f64, name: &str) -> Result<(), CoreError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{name} must be between 0 and 100, got {value}"
        )));
    }
    Ok(())
}

/// Validate that a value is finite and strictly positive.
pub fn validate_positive(value: f64, name: &str) -> Result<(), CoreError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::Validation(format!(
            "{name} must be a positive number, got {value}"
        )));
    }
    Ok(())
}
