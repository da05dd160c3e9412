//! # Error Types
//!
//! Domain-specific error types for fuelnet-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fuelnet-core errors (this file)                                       │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  fuelnet-link errors (separate crate)                                  │
//! │  └── LinkError        - Transport / protocol / admission failures      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LinkError → log / caller          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::{FuelGrade, OperationState};

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The pump does not dispense the requested grade.
    #[error("Fuel grade {grade} is not supported (supported: {supported:?})")]
    UnsupportedGrade {
        grade: FuelGrade,
        supported: Vec<FuelGrade>,
    },

    /// The current price set has no entry for the grade.
    #[error("No price configured for fuel grade {0}")]
    MissingPrice(FuelGrade),

    /// The requested action does not apply in the current operation state.
    ///
    /// ## When This Occurs
    /// - Starting a dispense while one is already running
    /// - Stopping a dispense on an idle pump
    /// - Changing the grade mid-dispense
    #[error("Cannot {action} while pump is {state}")]
    InvalidTransition {
        action: &'static str,
        state: OperationState,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidTransition {
            action: "start dispensing",
            state: OperationState::Dispensing,
        };
        assert_eq!(
            err.to_string(),
            "Cannot start dispensing while pump is dispensing"
        );

        let err = CoreError::MissingPrice(FuelGrade::from("diesel"));
        assert!(err.to_string().contains("diesel"));
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "station_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
