//! # Domain Types
//!
//! Small value types shared by every entity of the ledger.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Shared Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Currency     │   │  MovementType   │   │ TransactionKind │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  "PEN", "USD"   │   │  Income (+)     │   │  Cash           │       │
//! │  │  3 upper ASCII  │   │  Expense (-)    │   │  Bank           │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                              │
//! │  │  RegisterState  │   │ ReconcileStatus │                              │
//! │  │  ─────────────  │   │  ─────────────  │                              │
//! │  │  Opened         │   │  Pending   (1)  │                              │
//! │  │  Closed         │   │  Reconciled(2)  │                              │
//! │  └─────────────────┘   │  Rejected  (3)  │                              │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ValidationError;

/// Generates a new entity identifier (UUID v4 string).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Currency
// =============================================================================

/// An ISO 4217 style currency code: exactly three ASCII uppercase letters.
///
/// Used as the key of the per-currency balance and state maps of a cash
/// register. Construction always validates, including deserialization.
///
/// ## Example
/// ```rust
/// use tesoro_core::types::Currency;
///
/// let pen: Currency = "PEN".parse().unwrap();
/// assert_eq!(pen.as_str(), "PEN");
/// assert!("pen".parse::<Currency>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parses and validates a currency code.
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ValidationError::Required {
                field: "currency".to_string(),
            });
        }
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidFormat {
                field: "currency".to_string(),
                reason: format!("'{}' is not a three-letter uppercase code", code),
            });
        }
        Ok(Currency(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

// =============================================================================
// Movement Type
// =============================================================================

/// Direction of a money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Money entering the register.
    Income,
    /// Money leaving the register.
    Expense,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Income => "income",
            MovementType::Expense => "expense",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transaction Kind
// =============================================================================

/// Which payment channel a source transaction came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Cash,
    Bank,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Cash => "cash",
            TransactionKind::Bank => "bank",
        }
    }
}

// =============================================================================
// Register State
// =============================================================================

/// Per-currency open/closed flag of a cash register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RegisterState {
    Opened,
    #[default]
    Closed,
}

// =============================================================================
// Reconcile Status
// =============================================================================

/// Status of a bank reconcilement. Persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[repr(i32)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    #[default]
    Pending = 1,
    Reconciled = 2,
    Rejected = 3,
}

impl ReconcileStatus {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Result<Self, ValidationError> {
        match code {
            1 => Ok(ReconcileStatus::Pending),
            2 => Ok(ReconcileStatus::Reconciled),
            3 => Ok(ReconcileStatus::Rejected),
            other => Err(ValidationError::OutOfRange {
                field: format!("flag_status ({})", other),
                min: 1,
                max: 3,
            }),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
