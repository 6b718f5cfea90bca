//! # Bank Operation Ledger
//!
//! Statement lines reported by the bank, imported in batches.
//!
//! ```text
//!  statement file ──► import_batch() ──► bank_operations
//!                         │                  unique (company, account, number_operation)
//!                         ▼
//!                  ImportOutcome { inserted, skipped }
//! ```
//!
//! A line is only ever written once per natural key. After import the row is
//! touched exactly once more, when a reconcilement links it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;
use crate::types::MovementType;
use crate::validation::{validate_number_operation, validate_positive, validate_required};

/// A stored statement line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BankOperation {
    pub id: String,
    pub company_id: String,
    pub bank_id: String,
    pub bank_account_id: String,
    /// Bank-assigned line identifier.
    pub number_operation: String,
    pub movement_type: MovementType,
    pub amount: Money,
    #[ts(as = "String")]
    pub date_operation: NaiveDate,
    pub description: Option<String>,
    pub transaction_bank_id: Option<String>,
    pub reference_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl BankOperation {
    pub fn is_matched(&self) -> bool {
        self.transaction_bank_id.is_some() || self.reference_id.is_some()
    }
}

/// One incoming statement line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewBankOperation {
    pub number_operation: String,
    pub movement_type: MovementType,
    pub amount: Money,
    #[ts(as = "String")]
    pub date_operation: NaiveDate,
    pub description: Option<String>,
}

impl NewBankOperation {
    pub fn validate(&self) -> CoreResult<()> {
        validate_number_operation(&self.number_operation)?;
        validate_positive("amount", self.amount)?;
        Ok(())
    }
}

/// Target of a batch import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub company_id: String,
    pub bank_id: String,
    pub bank_account_id: String,
    pub lines: Vec<NewBankOperation>,
}

impl ImportBatch {
    pub fn validate(&self) -> CoreResult<()> {
        validate_required("company_id", &self.company_id)?;
        validate_required("bank_id", &self.bank_id)?;
        validate_required("bank_account_id", &self.bank_account_id)?;
        if self.lines.len() > crate::MAX_IMPORT_LINES {
            return Err(ValidationError::OutOfRange {
                field: "lines".to_string(),
                min: 0,
                max: crate::MAX_IMPORT_LINES as i64,
            }
            .into());
        }
        for line in &self.lines {
            line.validate()?;
        }
        Ok(())
    }
}

/// Result of a batch import. Both counts are reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ImportOutcome {
    pub inserted: u32,
    pub skipped: u32,
    /// `number_operation` of every skipped line, in input order.
    pub skipped_numbers: Vec<String>,
}

/// Fields written on a statement line when it is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OperationLink {
    pub operation_id: String,
    pub transaction_bank_id: Option<String>,
    pub reference_id: Option<String>,
    pub bank_account_id: String,
}

// =============================================================================
// Report
// =============================================================================

/// Statement lines of one account over a date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BankOperationReport {
    pub bank_account_id: String,
    pub operations: Vec<BankOperation>,
    pub total_income: Money,
    pub total_expense: Money,
    pub matched: u32,
    pub unmatched: u32,
}

impl BankOperationReport {
    pub fn from_operations(bank_account_id: &str, operations: Vec<BankOperation>) -> Self {
        let mut report = BankOperationReport {
            bank_account_id: bank_account_id.to_string(),
            ..Default::default()
        };
        for op in &operations {
            match op.movement_type {
                MovementType::Income => report.total_income += op.amount,
                MovementType::Expense => report.total_expense += op.amount,
            }
            if op.is_matched() {
                report.matched += 1;
            } else {
                report.unmatched += 1;
            }
        }
        report.operations = operations;
        report
    }

    pub fn net(&self) -> Money {
        self.total_income - self.total_expense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(number: &str, movement_type: MovementType, cents: i64, matched: bool) -> BankOperation {
        BankOperation {
            id: number.to_lowercase(),
            company_id: "c-1".to_string(),
            bank_id: "bcp".to_string(),
            bank_account_id: "A1".to_string(),
            number_operation: number.to_string(),
            movement_type,
            amount: Money::from_cents(cents),
            date_operation: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            description: None,
            transaction_bank_id: matched.then(|| "B1".to_string()),
            reference_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_report_totals_and_match_counts() {
        let report = BankOperationReport::from_operations(
            "A1",
            vec![
                op("OP-1", MovementType::Income, 10_000, true),
                op("OP-2", MovementType::Expense, 2_500, false),
                op("OP-3", MovementType::Income, 500, false),
            ],
        );

        assert_eq!(report.total_income.cents(), 10_500);
        assert_eq!(report.total_expense.cents(), 2_500);
        assert_eq!(report.net().cents(), 8_000);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched, 2);
    }

    #[test]
    fn test_line_validation() {
        let mut line = NewBankOperation {
            number_operation: "OP-1001".to_string(),
            movement_type: MovementType::Income,
            amount: Money::from_cents(100),
            date_operation: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            description: None,
        };
        assert!(line.validate().is_ok());

        line.amount = Money::zero();
        assert!(line.validate().is_err());

        line.amount = Money::from_cents(100);
        line.number_operation = " ".to_string();
        assert!(line.validate().is_err());
    }
}
