//! # Closing Session
//!
//! A per-register, per-currency accounting period.
//!
//! ## State Machine
//! ```text
//!        open()                         close() / create_offline()
//!   ───────────────►  ┌────────┐  ─────────────────────────────────►  ┌──────────┐
//!                     │  Open  │                                      │  Closed  │
//!                     └────────┘                                      └──────────┘
//!                                                                          │
//!                                                        void() (admin)    │
//!                                                                          ▼
//!                                                                  Closed { voided_at }
//! ```
//!
//! There is no way back from `Closed` to `Open`: a new period is always a new
//! session row. The persisted `closed_at` column being NULL is what the store
//! uses to find open sessions, but in Rust the two states are separate
//! variants so a closed session always carries its timestamp and end amount.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::movement::SourceTransaction;
use crate::types::{Currency, MovementType, TransactionKind};
use crate::validation::{validate_non_negative, validate_offline_hash, validate_required};

/// Net amount per payment method code, accumulated at closing time.
pub type RegisterInformation = BTreeMap<String, Money>;

// =============================================================================
// Session State
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed {
        #[ts(as = "String")]
        closed_at: DateTime<Utc>,
        closed_by: String,
        /// Computed: start + income - expense.
        end_amount: Money,
        /// What the employee counted, kept for variance reporting.
        reported_end_amount: Option<Money>,
        /// Set when the closing was rolled back by an administrator.
        #[ts(as = "Option<String>")]
        voided_at: Option<DateTime<Utc>>,
    },
}

// =============================================================================
// Closing Session
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ClosingSession {
    pub id: String,
    pub company_id: String,
    pub cash_register_id: String,
    #[ts(type = "string")]
    pub currency: Currency,
    pub terminal_id: Option<String>,
    pub opened_by: String,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    pub start_amount: Money,
    pub register_information: RegisterInformation,
    pub hash_offline: Option<String>,
    pub state: SessionState,
}

impl ClosingSession {
    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open)
    }

    pub fn is_voided(&self) -> bool {
        matches!(
            self.state,
            SessionState::Closed {
                voided_at: Some(_),
                ..
            }
        )
    }

    /// Double-close guard.
    pub fn ensure_open(&self) -> CoreResult<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Closed { .. } => Err(CoreError::conflict(
                "ClosingSession",
                &self.id,
                "session is already closed",
            )),
        }
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            SessionState::Closed { closed_at, .. } => Some(closed_at),
            SessionState::Open => None,
        }
    }

    pub fn end_amount(&self) -> Option<Money> {
        match self.state {
            SessionState::Closed { end_amount, .. } => Some(end_amount),
            SessionState::Open => None,
        }
    }

    /// Reported minus computed; `None` while open or when nothing was reported.
    pub fn variance(&self) -> Option<Money> {
        match self.state {
            SessionState::Closed {
                end_amount,
                reported_end_amount: Some(reported),
                ..
            } => Some(reported - end_amount),
            _ => None,
        }
    }

    /// Sum of the payment method breakdown.
    pub fn total_sales(&self) -> Money {
        self.register_information.values().sum()
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Input for `open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSession {
    pub cash_register_id: String,
    pub currency: Currency,
    pub opened_by: String,
    pub terminal_id: Option<String>,
    /// Defaults to the register's current balance in the currency.
    pub start_amount: Option<Money>,
}

impl OpenSession {
    pub fn validate(&self) -> CoreResult<()> {
        validate_required("cash_register_id", &self.cash_register_id)?;
        validate_required("opened_by", &self.opened_by)?;
        if let Some(amount) = self.start_amount {
            validate_non_negative("start_amount", amount)?;
        }
        Ok(())
    }
}

/// Input for `close`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSession {
    pub closed_by: String,
    pub reported_end_amount: Option<Money>,
}

impl CloseSession {
    pub fn validate(&self) -> CoreResult<()> {
        validate_required("closed_by", &self.closed_by)?;
        if let Some(amount) = self.reported_end_amount {
            validate_non_negative("reported_end_amount", amount)?;
        }
        Ok(())
    }
}

/// One historically-timestamped closing reported by an offline terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OfflineSession {
    pub hash_offline: String,
    pub terminal_id: Option<String>,
    pub opened_by: String,
    pub closed_by: String,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub closed_at: DateTime<Utc>,
    pub start_amount: Money,
    pub reported_end_amount: Option<Money>,
}

impl OfflineSession {
    pub fn validate(&self) -> CoreResult<()> {
        validate_offline_hash(&self.hash_offline)?;
        validate_required("opened_by", &self.opened_by)?;
        validate_required("closed_by", &self.closed_by)?;
        validate_non_negative("start_amount", self.start_amount)?;
        if let Some(amount) = self.reported_end_amount {
            validate_non_negative("reported_end_amount", amount)?;
        }
        if self.closed_at < self.opened_at {
            return Err(ValidationError::InvalidFormat {
                field: "closed_at".to_string(),
                reason: "closed before it was opened".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Whether a stored session is the same submission as this payload.
    ///
    /// Timestamps compare at millisecond resolution, which is what survives
    /// the store round trip on every backend.
    pub fn matches(&self, stored: &ClosingSession) -> bool {
        let same_close = match &stored.state {
            SessionState::Closed {
                closed_at,
                closed_by,
                reported_end_amount,
                ..
            } => {
                closed_at.timestamp_millis() == self.closed_at.timestamp_millis()
                    && *closed_by == self.closed_by
                    && *reported_end_amount == self.reported_end_amount
            }
            SessionState::Open => false,
        };

        same_close
            && stored.hash_offline.as_deref() == Some(self.hash_offline.as_str())
            && stored.opened_by == self.opened_by
            && stored.terminal_id == self.terminal_id
            && stored.start_amount == self.start_amount
            && stored.opened_at.timestamp_millis() == self.opened_at.timestamp_millis()
    }
}

// =============================================================================
// Pending Transactions
// =============================================================================

/// Not-yet-folded transactions eligible for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PendingTransactions {
    pub cash: Vec<SourceTransaction>,
    pub bank: Vec<SourceTransaction>,
}

impl PendingTransactions {
    /// Cash first, then bank, each in store order.
    pub fn all(&self) -> Vec<SourceTransaction> {
        self.cash.iter().chain(self.bank.iter()).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cash.is_empty() && self.bank.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cash.len() + self.bank.len()
    }

    pub fn ids_of(&self, kind: TransactionKind) -> Vec<String> {
        let list = match kind {
            TransactionKind::Cash => &self.cash,
            TransactionKind::Bank => &self.bank,
        };
        list.iter().map(|tx| tx.source.id().to_string()).collect()
    }

    pub fn total(&self, movement: MovementType) -> Money {
        self.cash
            .iter()
            .chain(self.bank.iter())
            .filter(|tx| tx.movement_type == movement)
            .map(|tx| tx.amount)
            .sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
