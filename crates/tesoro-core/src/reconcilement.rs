//! # Bank Reconcilement
//!
//! Matches internally recorded bank transactions (and optionally imported
//! statement lines) against a reconciliation record.
//!
//! ## Link Invariant
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BankReconcilement R                                                    │
//! │  related_documents = [T1, T2]                                           │
//! │                                                                         │
//! │  bank_transactions                                                      │
//! │  ├── T1  flag_reconciled = 1   bank_reconcilement_id = R                │
//! │  ├── T2  flag_reconciled = 1   bank_reconcilement_id = R                │
//! │  └── T3  flag_reconciled = 0   bank_reconcilement_id = NULL             │
//! │                                                                         │
//! │  update(R, related_documents = [T1])                                    │
//! │      LinkPlan { link: [], unlink: [T2], keep: [T1] }                    │
//! │                                                                         │
//! │  remove(R)                                                              │
//! │      every transaction pointing at R is unlinked                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The plan is computed here; the store applies it inside the same
//! transaction as the record write.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::ReconcileStatus;
use crate::validation::{validate_required, validate_unique_ids};

// =============================================================================
// Entity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BankReconcilement {
    pub id: String,
    pub company_id: String,
    pub bank_account_id: String,
    pub bank_id: String,
    /// Preparer.
    pub employee_id: String,
    #[ts(as = "String")]
    pub date: NaiveDate,
    /// Book amount.
    pub amount: Money,
    /// Statement amount. May differ from `amount`.
    pub amount_bank: Money,
    pub related_documents: Vec<String>,
    pub related_documents_canceled: Vec<String>,
    pub flag_locked: bool,
    pub flag_status: ReconcileStatus,
    pub flag_active: bool,
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl BankReconcilement {
    /// Edits and removal are refused once the record is locked.
    pub fn ensure_unlocked(&self) -> CoreResult<()> {
        if self.flag_locked {
            return Err(CoreError::conflict(
                "BankReconcilement",
                &self.id,
                "reconcilement is locked",
            ));
        }
        Ok(())
    }

    /// Book minus statement.
    pub fn difference(&self) -> Money {
        self.amount - self.amount_bank
    }

    /// Applies a patch in place. Lists are replaced, not merged.
    pub fn apply(&mut self, patch: &ReconcilementPatch) {
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(employee_id) = &patch.employee_id {
            self.employee_id = employee_id.clone();
        }
        if let Some(amount) = patch.amount {
            self.amount = amount;
        }
        if let Some(amount_bank) = patch.amount_bank {
            self.amount_bank = amount_bank;
        }
        if let Some(docs) = &patch.related_documents {
            self.related_documents = docs.clone();
        }
        if let Some(docs) = &patch.related_documents_canceled {
            self.related_documents_canceled = docs.clone();
        }
        if let Some(status) = patch.flag_status {
            self.flag_status = status;
        }
    }
}

// =============================================================================
// Inputs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReconcilement {
    pub company_id: String,
    pub bank_account_id: String,
    pub bank_id: String,
    pub employee_id: String,
    pub date: NaiveDate,
    pub amount: Money,
    pub amount_bank: Money,
    #[serde(default)]
    pub related_documents: Vec<String>,
    #[serde(default)]
    pub related_documents_canceled: Vec<String>,
}

impl NewReconcilement {
    pub fn validate(&self) -> CoreResult<()> {
        validate_required("company_id", &self.company_id)?;
        validate_required("bank_account_id", &self.bank_account_id)?;
        validate_required("bank_id", &self.bank_id)?;
        validate_required("employee_id", &self.employee_id)?;
        validate_document_lists(&self.related_documents, &self.related_documents_canceled)
    }
}

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcilementPatch {
    pub date: Option<NaiveDate>,
    pub employee_id: Option<String>,
    pub amount: Option<Money>,
    pub amount_bank: Option<Money>,
    pub related_documents: Option<Vec<String>>,
    pub related_documents_canceled: Option<Vec<String>>,
    pub flag_status: Option<ReconcileStatus>,
}

/// A statement line to match while editing by operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMatch {
    pub operation_id: String,
    pub transaction_bank_id: Option<String>,
    /// Defaults to the reconcilement id.
    pub reference_id: Option<String>,
}

fn validate_document_lists(related: &[String], canceled: &[String]) -> CoreResult<()> {
    validate_unique_ids("related_documents", related)?;
    validate_unique_ids("related_documents_canceled", canceled)?;
    let included: HashSet<&str> = related.iter().map(String::as_str).collect();
    if let Some(both) = canceled.iter().find(|id| included.contains(id.as_str())) {
        return Err(ValidationError::Duplicate {
            field: "related_documents_canceled".to_string(),
            value: both.clone(),
        }
        .into());
    }
    Ok(())
}

impl ReconcilementPatch {
    /// Validates the patch against the record it will be applied to.
    pub fn validate_against(&self, current: &BankReconcilement) -> CoreResult<()> {
        if let Some(employee_id) = &self.employee_id {
            validate_required("employee_id", employee_id)?;
        }
        let related = self
            .related_documents
            .as_deref()
            .unwrap_or(&current.related_documents);
        let canceled = self
            .related_documents_canceled
            .as_deref()
            .unwrap_or(&current.related_documents_canceled);
        validate_document_lists(related, canceled)
    }
}

// =============================================================================
// Link Plan
// =============================================================================

/// Which transactions to link and unlink when a document list changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPlan {
    pub link: Vec<String>,
    pub unlink: Vec<String>,
    pub keep: Vec<String>,
}

impl LinkPlan {
    /// Diff of two lists, preserving the order of each input.
    ///
    /// ## Example
    /// ```rust
    /// use tesoro_core::reconcilement::LinkPlan;
    ///
    /// let old = vec!["T1".to_string(), "T2".to_string()];
    /// let new = vec!["T1".to_string()];
    /// let plan = LinkPlan::between(&old, &new);
    /// assert_eq!(plan.unlink, vec!["T2".to_string()]);
    /// assert!(plan.link.is_empty());
    /// ```
    pub fn between(old: &[String], new: &[String]) -> Self {
        let old_set: HashSet<&str> = old.iter().map(String::as_str).collect();
        let new_set: HashSet<&str> = new.iter().map(String::as_str).collect();

        let mut plan = LinkPlan::default();
        for id in new {
            if old_set.contains(id.as_str()) {
                plan.keep.push(id.clone());
            } else {
                plan.link.push(id.clone());
            }
        }
        plan.unlink = old
            .iter()
            .filter(|id| !new_set.contains(id.as_str()))
            .cloned()
            .collect();
        plan
    }

    /// Plan for a brand-new record.
    pub fn initial(new: &[String]) -> Self {
        LinkPlan {
            link: new.to_vec(),
            ..Default::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.link.is_empty() && self.unlink.is_empty()
    }
}

// =============================================================================
// Link Audit
// =============================================================================

/// Result of comparing a record's list with what the store points at it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LinkAudit {
    pub reconcilement_id: String,
    /// Listed, but the transaction is not flagged or points elsewhere.
    pub missing: Vec<String>,
    /// Points at the record, but is not listed.
    pub stray: Vec<String>,
}

impl LinkAudit {
    pub fn compute(reconcilement_id: &str, listed: &[String], pointing: &[String]) -> Self {
        let listed_set: HashSet<&str> = listed.iter().map(String::as_str).collect();
        let pointing_set: HashSet<&str> = pointing.iter().map(String::as_str).collect();
        LinkAudit {
            reconcilement_id: reconcilement_id.to_string(),
            missing: listed
                .iter()
                .filter(|id| !pointing_set.contains(id.as_str()))
                .cloned()
                .collect(),
            stray: pointing
                .iter()
                .filter(|id| !listed_set.contains(id.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.stray.is_empty()
    }

    /// Turns an inconsistent audit into `ConsistencyViolation`.
    pub fn into_result(self) -> CoreResult<Self> {
        if self.is_consistent() {
            return Ok(self);
        }
        Err(CoreError::ConsistencyViolation(format!(
            "reconcilement {} links out of sync: missing {:?}, stray {:?}",
            self.reconcilement_id, self.missing, self.stray
        )))
    }
}
