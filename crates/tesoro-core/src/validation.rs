//! # Validation Module
//!
//! Input checks applied before any ledger mutation reaches the store.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: Caller (route handler)  - schema/shape                        │
//! │  Layer 2: THIS MODULE             - ledger input rules                  │
//! │  Layer 3: SQLite                  - NOT NULL, CHECK, UNIQUE indexes     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::Currency;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates that a required identifier is present and non-blank.
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates an amount that may be zero but not negative
/// (session start amounts, reset targets, reported counts).
///
/// ```rust
/// use tesoro_core::money::Money;
/// use tesoro_core::validation::validate_non_negative;
///
/// assert!(validate_non_negative("start_amount", Money::zero()).is_ok());
/// assert!(validate_non_negative("start_amount", Money::from_cents(-1)).is_err());
/// ```
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a movement or statement amount: strictly positive.
pub fn validate_positive(field: &str, amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates that a currency is part of the accepted set.
///
/// An empty accepted set means every well-formed code is accepted.
pub fn validate_accepted_currency(currency: &Currency, accepted: &[Currency]) -> ValidationResult<()> {
    if accepted.is_empty() || accepted.contains(currency) {
        return Ok(());
    }
    Err(ValidationError::NotAllowed {
        field: "currency".to_string(),
        allowed: accepted.iter().map(|c| c.to_string()).collect(),
    })
}

/// Validates a bank-assigned statement line number.
///
/// ## Rules
/// - Must not be blank
/// - At most 64 characters
pub fn validate_number_operation(number: &str) -> ValidationResult<()> {
    let number = number.trim();
    if number.is_empty() {
        return Err(ValidationError::Required {
            field: "number_operation".to_string(),
        });
    }
    if number.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "number_operation".to_string(),
            max: 64,
        });
    }
    Ok(())
}

/// Validates an offline idempotency hash.
pub fn validate_offline_hash(hash: &str) -> ValidationResult<()> {
    let hash = hash.trim();
    if hash.is_empty() {
        return Err(ValidationError::Required {
            field: "hash_offline".to_string(),
        });
    }
    if hash.len() > 128 {
        return Err(ValidationError::TooLong {
            field: "hash_offline".to_string(),
            max: 128,
        });
    }
    Ok(())
}

/// Validates a UUID string.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    validate_required(field, id)?;
    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;
    Ok(())
}

/// Rejects an id list that names the same id twice.
pub fn validate_unique_ids(field: &str, ids: &[String]) -> ValidationResult<()> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    for id in ids {
        validate_required(field, id)?;
        if !seen.insert(id.as_str()) {
            return Err(ValidationError::Duplicate {
                field: field.to_string(),
                value: id.clone(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
