//! # Error Types
//!
//! Domain-specific error types for tesoro-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tesoro-core errors (this file)                                        │
//! │  ├── CoreError        - Ledger rule violations                         │
//! │  │   ├── NotFound             unknown id / foreign company             │
//! │  │   ├── Conflict             double open, double close, locked edit   │
//! │  │   ├── Rejected             inactive register                        │
//! │  │   ├── ConsistencyViolation conservation or link check failed        │
//! │  │   └── Validation           wraps ValidationError                    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tesoro-db errors (separate crate)                                     │
//! │  └── DbError          - Store failures + the taxonomy above            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Ledger rule violations.
///
/// Every variant is raised synchronously by the operation that would break
/// the rule; nothing is repaired silently.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Referenced entity does not exist or belongs to another company.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The entity is not in a state that allows the operation.
    ///
    /// ## When This Occurs
    /// - Opening a second session on the same register and currency
    /// - Closing a session that is already closed
    /// - Editing or removing a locked reconcilement
    /// - Resubmitting an offline hash with a different payload
    #[error("Conflict on {entity} {id}: {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    /// Operation refused by entity configuration (e.g. inactive register).
    #[error("{entity} {id} rejected the operation: {reason}")]
    Rejected {
        entity: String,
        id: String,
        reason: String,
    },

    /// An internal invariant was found broken. Should never surface in
    /// normal operation.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn conflict(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::Conflict {
            entity: entity.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn rejected(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::Rejected {
            entity: entity.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g. currency code, UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in the allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Same value given twice where it must be unique.
    #[error("{field} '{value}' is duplicated")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::conflict("ClosingSession", "s-1", "already closed");
        assert_eq!(err.to_string(), "Conflict on ClosingSession s-1: already closed");

        let err = CoreError::not_found("CashRegister", "r-9");
        assert_eq!(err.to_string(), "CashRegister not found: r-9");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Negative {
            field: "start_amount".to_string(),
        };
        assert_eq!(err.to_string(), "start_amount must not be negative");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "currency".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
