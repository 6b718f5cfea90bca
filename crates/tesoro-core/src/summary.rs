//! # Session Summary
//!
//! Read-only report over the movement trail of one closing session.
//!
//! ```text
//!  ClosingSession + CashMovementRecord[]
//!          │
//!          ▼
//!  ┌──────────────────────────────────────────────┐
//!  │ start_amount                        100.00   │
//!  │ + income                             50.00   │
//!  │ - expense                            20.00   │
//!  │ = end_amount (computed)             130.00   │  ◄── conservation check
//!  │   reported_end_amount               200.00   │
//!  │   variance                           70.00   │
//!  │                                              │
//!  │ cash 30.00   bank 0.00                       │
//!  │ CASH 30.00                                   │
//!  └──────────────────────────────────────────────┘
//! ```
//!
//! An open session has no trail yet. The session repository builds unsaved
//! records from the pending transactions with `build_from` and summarizes
//! those; without an end amount there is nothing to check.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::movement::{CashMovementRecord, FoldTotals};
use crate::session::{ClosingSession, SessionState};
use crate::types::{MovementType, TransactionKind};

/// Totals of one payment method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentMethodLine {
    pub payment_method: String,
    pub income: Money,
    pub expense: Money,
    pub count: u32,
}

impl PaymentMethodLine {
    pub fn net(&self) -> Money {
        self.income - self.expense
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionSummary {
    pub session_id: String,
    pub currency: String,
    pub is_open: bool,
    pub start_amount: Money,
    pub total_income: Money,
    pub total_expense: Money,
    /// Net of cash-sourced movements.
    pub cash_total: Money,
    /// Net of bank-sourced movements.
    pub bank_total: Money,
    pub total_sales: Money,
    pub end_amount: Option<Money>,
    pub reported_end_amount: Option<Money>,
    /// Reported minus computed.
    pub variance: Option<Money>,
    pub by_payment_method: Vec<PaymentMethodLine>,
    pub movement_count: u32,
}

/// `start + income - expense == end`
pub fn conservation_holds(start: Money, income: Money, expense: Money, end: Money) -> bool {
    start + income - expense == end
}

impl SessionSummary {
    /// Builds the summary and, for a closed session, asserts conservation.
    ///
    /// ## Errors
    /// `ConsistencyViolation` when the stored end amount disagrees with the
    /// trail.
    pub fn build(session: &ClosingSession, records: &[CashMovementRecord]) -> CoreResult<Self> {
        let totals = FoldTotals::from_records(records);

        let mut cash_total = Money::zero();
        let mut bank_total = Money::zero();
        let mut lines: BTreeMap<&str, PaymentMethodLine> = BTreeMap::new();
        for record in records {
            match record.source.kind() {
                TransactionKind::Cash => cash_total += record.signed_amount(),
                TransactionKind::Bank => bank_total += record.signed_amount(),
            }
            let line = lines
                .entry(record.payment_method.as_str())
                .or_insert_with(|| PaymentMethodLine {
                    payment_method: record.payment_method.clone(),
                    ..Default::default()
                });
            match record.movement_type {
                MovementType::Income => line.income += record.amount,
                MovementType::Expense => line.expense += record.amount,
            }
            line.count += 1;
        }

        let (end_amount, reported_end_amount, total_sales) = match &session.state {
            SessionState::Closed {
                end_amount,
                reported_end_amount,
                ..
            } => {
                if !conservation_holds(session.start_amount, totals.income, totals.expense, *end_amount) {
                    return Err(CoreError::ConsistencyViolation(format!(
                        "session {}: start {} + income {} - expense {} != end {}",
                        session.id, session.start_amount, totals.income, totals.expense, end_amount
                    )));
                }
                (Some(*end_amount), *reported_end_amount, session.total_sales())
            }
            SessionState::Open => (None, None, totals.net()),
        };

        Ok(SessionSummary {
            session_id: session.id.clone(),
            currency: session.currency.to_string(),
            is_open: session.is_open(),
            start_amount: session.start_amount,
            total_income: totals.income,
            total_expense: totals.expense,
            cash_total,
            bank_total,
            total_sales,
            end_amount,
            reported_end_amount,
            variance: session.variance(),
            by_payment_method: lines.into_values().collect(),
            movement_count: records.len() as u32,
        })
    }
}
