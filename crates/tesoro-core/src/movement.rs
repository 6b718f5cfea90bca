//! # Cash Movement Trail
//!
//! Derives the immutable audit records written when transactions are folded
//! into a closing session.
//!
//! ## Fold-in
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SourceTransaction (cash or bank, owned by another subsystem)           │
//! │       │                                                                 │
//! │       │  build_from(): one record per distinct (kind, id)               │
//! │       ▼                                                                 │
//! │  CashMovementRecord                                                     │
//! │  ├── source          Cash(id) | Bank(id)                                │
//! │  ├── movement_type   Income | Expense                                   │
//! │  ├── amount          always positive                                    │
//! │  └── snapshot        concept, reference, payment method, ... (frozen)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The snapshot is copied at fold-in time so that later edits or deletion of
//! the source transaction never rewrite historical closings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{new_id, Currency, MovementType, TransactionKind};

// =============================================================================
// Movement Source
// =============================================================================

/// Which transaction a movement was folded from.
///
/// Exactly one of the two ids exists; "both" and "neither" cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type_transaction", content = "id", rename_all = "snake_case")]
pub enum MovementSource {
    Cash(String),
    Bank(String),
}

impl MovementSource {
    pub fn kind(&self) -> TransactionKind {
        match self {
            MovementSource::Cash(_) => TransactionKind::Cash,
            MovementSource::Bank(_) => TransactionKind::Bank,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            MovementSource::Cash(id) | MovementSource::Bank(id) => id,
        }
    }

    /// Splits into the `(transaction_id, transaction_bank_id)` column pair.
    pub fn columns(&self) -> (Option<&str>, Option<&str>) {
        match self {
            MovementSource::Cash(id) => (Some(id.as_str()), None),
            MovementSource::Bank(id) => (None, Some(id.as_str())),
        }
    }

    /// Rebuilds from the column pair, `None` when the pair is illegal.
    pub fn from_columns(
        kind: TransactionKind,
        transaction_id: Option<String>,
        transaction_bank_id: Option<String>,
    ) -> Option<Self> {
        match (kind, transaction_id, transaction_bank_id) {
            (TransactionKind::Cash, Some(id), None) => Some(MovementSource::Cash(id)),
            (TransactionKind::Bank, None, Some(id)) => Some(MovementSource::Bank(id)),
            _ => None,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Descriptive fields of a source transaction, frozen at fold-in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AdditionalInformation {
    pub document_number: Option<String>,
    pub counterparty: Option<String>,
    #[ts(as = "Option<String>")]
    pub occurred_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Source Transaction
// =============================================================================

/// A payment transaction as handed over by the transaction subsystems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SourceTransaction {
    pub source: MovementSource,
    pub company_id: String,
    pub cash_register_id: String,
    #[ts(type = "string")]
    pub currency: Currency,
    pub movement_type: MovementType,
    pub amount: Money,
    /// Payment method code ("CASH", "VISA", "TRANSFER", ...).
    pub payment_method: String,
    pub concept: Option<String>,
    pub reference: Option<String>,
    pub additional_information: AdditionalInformation,
    /// Set when the transaction was captured by an offline terminal.
    pub hash_offline: Option<String>,
    /// Session the transaction was folded into, if any.
    pub closing_session_id: Option<String>,
}

impl SourceTransaction {
    /// Signed effect on the register balance.
    pub fn signed_amount(&self) -> Money {
        self.amount.signed(self.movement_type)
    }
}

// =============================================================================
// Cash Movement Record
// =============================================================================

/// One line of the audit trail of a closing session. Never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashMovementRecord {
    pub id: String,
    pub closing_session_id: String,
    pub company_id: String,
    pub source: MovementSource,
    pub movement_type: MovementType,
    pub amount: Money,
    pub payment_method: String,
    pub concept: Option<String>,
    pub reference: Option<String>,
    pub additional_information: AdditionalInformation,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CashMovementRecord {
    pub fn signed_amount(&self) -> Money {
        self.amount.signed(self.movement_type)
    }
}

/// Maps source transactions to movement records for one session.
///
/// Duplicates by `(kind, id)` are dropped; the first occurrence wins and
/// the input order is preserved.
///
/// ## Example
/// ```rust,ignore
/// let records = build_from("session-1", "company-1", &pending, Utc::now());
/// assert!(records.len() <= pending.len());
/// ```
pub fn build_from(
    closing_session_id: &str,
    company_id: &str,
    transactions: &[SourceTransaction],
    now: DateTime<Utc>,
) -> Vec<CashMovementRecord> {
    let mut seen: HashSet<&MovementSource> = HashSet::with_capacity(transactions.len());

    transactions
        .iter()
        .filter(|tx| seen.insert(&tx.source))
        .map(|tx| CashMovementRecord {
            id: new_id(),
            closing_session_id: closing_session_id.to_string(),
            company_id: company_id.to_string(),
            source: tx.source.clone(),
            movement_type: tx.movement_type,
            amount: tx.amount,
            payment_method: tx.payment_method.clone(),
            concept: tx.concept.clone(),
            reference: tx.reference.clone(),
            additional_information: tx.additional_information.clone(),
            created_at: now,
        })
        .collect()
}

// =============================================================================
// Fold Totals
// =============================================================================

/// Aggregates of a set of movement records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FoldTotals {
    pub income: Money,
    pub expense: Money,
    /// Net signed amount per payment method code.
    pub by_payment_method: BTreeMap<String, Money>,
}

impl FoldTotals {
    pub fn from_records(records: &[CashMovementRecord]) -> Self {
        let mut totals = FoldTotals::default();
        for record in records {
            match record.movement_type {
                MovementType::Income => totals.income += record.amount,
                MovementType::Expense => totals.expense += record.amount,
            }
            *totals
                .by_payment_method
                .entry(record.payment_method.clone())
                .or_default() += record.signed_amount();
        }
        totals
    }

    /// Net delta applied to the register balance.
    pub fn net(&self) -> Money {
        self.income - self.expense
    }

    /// Ending amount of a session that started at `start`.
    pub fn end_amount(&self, start: Money) -> Money {
        start + self.net()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
