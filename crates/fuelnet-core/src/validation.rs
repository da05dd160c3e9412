//! # Validation Module
//!
//! Input validation for identifiers, grades and price tables.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Wire decoding (fuelnet-link protocol)                        │
//! │  ├── Record kind and field presence (serde)                            │
//! │  └── Unknown fields → MalformedFrame                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Identifier shape (config + admission)                             │
//! │  └── Grade membership (pump grade selection)                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Record store                                                 │
//! │  └── Is this pump actually known? (pumpExists)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::prices::PriceSet;
use crate::types::{FuelGrade, PumpId};
use crate::MAX_STATION_ID_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a pump identifier. Zero is reserved as "unset".
pub fn validate_pump_id(id: PumpId) -> ValidationResult<()> {
    if id.get() == 0 {
        return Err(ValidationError::MustBePositive {
            field: "pump_id".to_string(),
        });
    }
    Ok(())
}

/// Validates a station identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, numbers, hyphens and underscores only
///
/// ## Example
/// ```rust
/// use fuelnet_core::validation::validate_station_id;
///
/// assert!(validate_station_id("station-001").is_ok());
/// assert!(validate_station_id("").is_err());
/// assert!(validate_station_id("north side").is_err());
/// ```
pub fn validate_station_id(id: &str) -> ValidationResult<()> {
    let id = id.trim();

    if id.is_empty() {
        return Err(ValidationError::Required {
            field: "station_id".to_string(),
        });
    }

    if id.len() > MAX_STATION_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "station_id".to_string(),
            max: MAX_STATION_ID_LEN,
        });
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "station_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Grade / Price Validators
// =============================================================================

/// Checks that `grade` is one of the pump's supported grades.
pub fn ensure_grade_supported(grade: &FuelGrade, supported: &[FuelGrade]) -> CoreResult<()> {
    if supported.contains(grade) {
        Ok(())
    } else {
        Err(CoreError::UnsupportedGrade {
            grade: grade.clone(),
            supported: supported.to_vec(),
        })
    }
}

/// Validates a configured list of supported grades.
pub fn validate_grades(grades: &[FuelGrade]) -> ValidationResult<()> {
    if grades.is_empty() {
        return Err(ValidationError::Required {
            field: "supported_grades".to_string(),
        });
    }
    if grades.iter().any(|g| g.as_str().trim().is_empty()) {
        return Err(ValidationError::InvalidFormat {
            field: "supported_grades".to_string(),
            reason: "grade keys must not be blank".to_string(),
        });
    }
    Ok(())
}

/// Validates a price table that will seed a node.
pub fn validate_price_set(prices: &PriceSet) -> ValidationResult<()> {
    if prices.is_empty() {
        return Err(ValidationError::Required {
            field: "prices".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_id() {
        assert!(validate_pump_id(PumpId::new(1)).is_ok());
        assert!(validate_pump_id(PumpId::new(0)).is_err());
    }

    #[test]
    fn test_station_id() {
        assert!(validate_station_id("station_01").is_ok());
        assert!(validate_station_id("   ").is_err());
        assert!(validate_station_id(&"s".repeat(65)).is_err());
        assert!(validate_station_id("bad/id").is_err());
    }

    #[test]
    fn test_grade_supported() {
        let supported = crate::types::default_grades();
        assert!(ensure_grade_supported(&"diesel".into(), &supported).is_ok());
        assert!(matches!(
            ensure_grade_supported(&"avgas".into(), &supported),
            Err(CoreError::UnsupportedGrade { .. })
        ));
    }

    #[test]
    fn test_price_set_and_grades() {
        assert!(validate_price_set(&PriceSet::standard()).is_ok());
        assert!(validate_price_set(&PriceSet::new()).is_err());
        assert!(validate_grades(&[]).is_err());
        assert!(validate_grades(&[FuelGrade::from("")]).is_err());
    }
}
