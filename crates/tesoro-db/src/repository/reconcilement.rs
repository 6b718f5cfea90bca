//! # Reconcilement Repository
//!
//! Bank reconcilements and the reconciliation flag they own on bank
//! transactions.
//!
//! ## Edit Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │    claim        UPDATE bank_reconcilements SET version = version + 1    │
//! │                 WHERE id AND company AND flag_active  (0 rows: NotFound)│
//! │    locked? ──► Conflict, rollback                                       │
//! │    LinkPlan::between(old list, new list)                                │
//! │    unlink  ──► flag_reconciled = 0 on dropped ids                       │
//! │            ──► release statement lines matched to dropped ids           │
//! │    link    ──► flag_reconciled = 1 on added ids                         │
//! │    [edit_by_operations] link statement lines                            │
//! │    write record                                                         │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! After any committed sequence, the bank transactions pointing at an active
//! record are exactly its `related_documents`.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tesoro_core::bank::OperationLink;
use tesoro_core::money::Money;
use tesoro_core::reconcilement::{
    BankReconcilement, LinkAudit, LinkPlan, NewReconcilement, OperationMatch, ReconcilementPatch,
};
use tesoro_core::types::{new_id, ReconcileStatus};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::{bank_operation, transaction};

const SELECT_RECONCILEMENT: &str = r#"
    SELECT id, company_id, bank_account_id, bank_id, employee_id, date, amount,
           amount_bank, related_documents, related_documents_canceled, flag_locked,
           flag_status, flag_active, version, created_at, updated_at
    FROM bank_reconcilements
"#;

#[derive(Debug, sqlx::FromRow)]
struct ReconcilementRow {
    id: String,
    company_id: String,
    bank_account_id: String,
    bank_id: String,
    employee_id: String,
    date: NaiveDate,
    amount: i64,
    amount_bank: i64,
    related_documents: String,
    related_documents_canceled: String,
    flag_locked: bool,
    flag_status: i32,
    flag_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReconcilementRow> for BankReconcilement {
    type Error = DbError;

    fn try_from(row: ReconcilementRow) -> DbResult<Self> {
        Ok(BankReconcilement {
            related_documents: serde_json::from_str(&row.related_documents)?,
            related_documents_canceled: serde_json::from_str(&row.related_documents_canceled)?,
            flag_status: ReconcileStatus::from_code(row.flag_status)?,
            id: row.id,
            company_id: row.company_id,
            bank_account_id: row.bank_account_id,
            bank_id: row.bank_id,
            employee_id: row.employee_id,
            date: row.date,
            amount: Money::from_cents(row.amount),
            amount_bank: Money::from_cents(row.amount_bank),
            flag_locked: row.flag_locked,
            flag_active: row.flag_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// =============================================================================
// Transaction-scoped helpers
// =============================================================================

/// Locks an active record of the company for the rest of the transaction.
async fn claim(conn: &mut SqliteConnection, id: &str, company_id: &str) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE bank_reconcilements
        SET version = version + 1
        WHERE id = ?1 AND company_id = ?2 AND flag_active = 1
        "#,
    )
    .bind(id)
    .bind(company_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("BankReconcilement", id));
    }
    Ok(())
}

async fn fetch(
    conn: &mut SqliteConnection,
    id: &str,
    company_id: &str,
) -> DbResult<Option<BankReconcilement>> {
    let row: Option<ReconcilementRow> = sqlx::query_as(&format!(
        "{} WHERE id = ?1 AND company_id = ?2",
        SELECT_RECONCILEMENT
    ))
    .bind(id)
    .bind(company_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(BankReconcilement::try_from).transpose()
}

async fn fetch_required(
    conn: &mut SqliteConnection,
    id: &str,
    company_id: &str,
) -> DbResult<BankReconcilement> {
    fetch(conn, id, company_id)
        .await?
        .ok_or_else(|| DbError::not_found("BankReconcilement", id))
}

/// Writes the editable columns of `record`.
async fn store(conn: &mut SqliteConnection, record: &BankReconcilement) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE bank_reconcilements
        SET date = ?2, employee_id = ?3, amount = ?4, amount_bank = ?5,
            related_documents = ?6, related_documents_canceled = ?7,
            flag_status = ?8, updated_at = ?9
        WHERE id = ?1
        "#,
    )
    .bind(&record.id)
    .bind(record.date)
    .bind(&record.employee_id)
    .bind(record.amount.cents())
    .bind(record.amount_bank.cents())
    .bind(serde_json::to_string(&record.related_documents)?)
    .bind(serde_json::to_string(&record.related_documents_canceled)?)
    .bind(record.flag_status.code())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn apply_plan(
    conn: &mut SqliteConnection,
    record: &BankReconcilement,
    plan: &LinkPlan,
) -> DbResult<()> {
    if plan.is_noop() {
        return Ok(());
    }
    transaction::unlink(conn, &plan.unlink, &record.id).await?;
    bank_operation::unlink_transactions(conn, &record.company_id, &plan.unlink).await?;
    transaction::link_to_reconcilement(conn, &record.company_id, &plan.link, &record.id).await?;
    debug!(
        reconcilement_id = %record.id,
        linked = plan.link.len(),
        unlinked = plan.unlink.len(),
        kept = plan.keep.len(),
        "Reconcilement links applied"
    );
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for bank reconcilements.
#[derive(Debug, Clone)]
pub struct ReconcilementRepository {
    pool: SqlitePool,
}

impl ReconcilementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReconcilementRepository { pool }
    }

    /// Inserts a record and flags every listed bank transaction as
    /// reconciled by it.
    ///
    /// ## Errors
    /// - `NotFound` when a listed transaction does not exist
    /// - `Conflict` when a listed transaction belongs to another record
    pub async fn create(&self, input: &NewReconcilement) -> DbResult<BankReconcilement> {
        input.validate()?;

        let id = new_id();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO bank_reconcilements (
                id, company_id, bank_account_id, bank_id, employee_id, date, amount,
                amount_bank, related_documents, related_documents_canceled,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
        )
        .bind(&id)
        .bind(&input.company_id)
        .bind(&input.bank_account_id)
        .bind(&input.bank_id)
        .bind(&input.employee_id)
        .bind(input.date)
        .bind(input.amount.cents())
        .bind(input.amount_bank.cents())
        .bind(serde_json::to_string(&input.related_documents)?)
        .bind(serde_json::to_string(&input.related_documents_canceled)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let record = fetch_required(&mut tx, &id, &input.company_id).await?;
        apply_plan(&mut tx, &record, &LinkPlan::initial(&record.related_documents)).await?;
        tx.commit().await?;

        info!(
            reconcilement_id = %record.id,
            bank_account_id = %record.bank_account_id,
            documents = record.related_documents.len(),
            "Reconcilement created"
        );
        Ok(record)
    }

    /// Patches a record. Ids dropped from `related_documents` are unlinked
    /// and new ones linked, in the same transaction.
    pub async fn update(
        &self,
        id: &str,
        company_id: &str,
        patch: &ReconcilementPatch,
    ) -> DbResult<BankReconcilement> {
        self.edit(id, company_id, patch, &[]).await
    }

    /// Like [`update`](Self::update), and also points the given statement
    /// lines at the record.
    ///
    /// A match naming a bank transaction adds it to `related_documents`.
    pub async fn edit_by_operations(
        &self,
        id: &str,
        company_id: &str,
        patch: &ReconcilementPatch,
        operations: &[OperationMatch],
    ) -> DbResult<BankReconcilement> {
        self.edit(id, company_id, patch, operations).await
    }

    async fn edit(
        &self,
        id: &str,
        company_id: &str,
        patch: &ReconcilementPatch,
        operations: &[OperationMatch],
    ) -> DbResult<BankReconcilement> {
        let mut tx = self.pool.begin().await?;
        claim(&mut tx, id, company_id).await?;
        let current = fetch_required(&mut tx, id, company_id).await?;
        current.ensure_unlocked()?;

        let mut next = current.clone();
        next.apply(patch);
        for op in operations {
            if let Some(bank_tx) = &op.transaction_bank_id {
                if !next.related_documents.contains(bank_tx) {
                    next.related_documents.push(bank_tx.clone());
                }
            }
        }
        let lists = ReconcilementPatch {
            related_documents: Some(next.related_documents.clone()),
            ..patch.clone()
        };
        lists.validate_against(&current)?;

        let plan = LinkPlan::between(&current.related_documents, &next.related_documents);
        apply_plan(&mut tx, &next, &plan).await?;

        for op in operations {
            let link = OperationLink {
                operation_id: op.operation_id.clone(),
                transaction_bank_id: op.transaction_bank_id.clone(),
                reference_id: Some(op.reference_id.clone().unwrap_or_else(|| id.to_string())),
                bank_account_id: current.bank_account_id.clone(),
            };
            bank_operation::link_to_reconcilement(&mut tx, company_id, &link).await?;
        }

        store(&mut tx, &next).await?;
        let stored = fetch_required(&mut tx, id, company_id).await?;
        tx.commit().await?;

        info!(
            reconcilement_id = id,
            linked = plan.link.len(),
            unlinked = plan.unlink.len(),
            operations = operations.len(),
            "Reconcilement updated"
        );
        Ok(stored)
    }

    /// Soft-deletes a record, unlinks every transaction pointing at it and
    /// releases its matched statement lines.
    pub async fn remove(&self, id: &str, company_id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        claim(&mut tx, id, company_id).await?;
        let current = fetch_required(&mut tx, id, company_id).await?;
        current.ensure_unlocked()?;

        let unlinked = transaction::unlink_all(&mut tx, id).await?;
        let released =
            bank_operation::unlink_reconcilement(&mut tx, company_id, id, &current.related_documents)
                .await?;
        let now = Utc::now();
        sqlx::query(
            "UPDATE bank_reconcilements SET flag_active = 0, deleted_at = ?2, updated_at = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(reconcilement_id = id, unlinked, released, "Reconcilement removed");
        Ok(())
    }

    /// Finalizes a record with `status`; no edit is accepted afterwards.
    pub async fn lock(
        &self,
        id: &str,
        company_id: &str,
        status: ReconcileStatus,
    ) -> DbResult<BankReconcilement> {
        let mut tx = self.pool.begin().await?;
        claim(&mut tx, id, company_id).await?;
        fetch_required(&mut tx, id, company_id).await?.ensure_unlocked()?;

        sqlx::query(
            "UPDATE bank_reconcilements SET flag_locked = 1, flag_status = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(status.code())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        let locked = fetch_required(&mut tx, id, company_id).await?;
        tx.commit().await?;

        info!(reconcilement_id = id, status = status.code(), "Reconcilement locked");
        Ok(locked)
    }

    /// Gets a record of the company, removed ones included.
    pub async fn get(&self, id: &str, company_id: &str) -> DbResult<BankReconcilement> {
        let mut conn = self.pool.acquire().await?;
        fetch_required(&mut conn, id, company_id).await
    }

    /// Latest record of an account, used to seed the next one.
    pub async fn get_last_record(
        &self,
        bank_account_id: &str,
        company_id: &str,
        flag_active: bool,
    ) -> DbResult<Option<BankReconcilement>> {
        let row: Option<ReconcilementRow> = sqlx::query_as(&format!(
            "{} WHERE bank_account_id = ?1 AND company_id = ?2 AND flag_active = ?3 \
             ORDER BY date DESC, created_at DESC LIMIT 1",
            SELECT_RECONCILEMENT
        ))
        .bind(bank_account_id)
        .bind(company_id)
        .bind(flag_active)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BankReconcilement::try_from).transpose()
    }

    /// Compares the record's list with the transactions pointing at it.
    ///
    /// ## Errors
    /// `ConsistencyViolation` when they differ.
    pub async fn verify_links(&self, id: &str, company_id: &str) -> DbResult<LinkAudit> {
        let mut conn = self.pool.acquire().await?;
        let record = fetch_required(&mut conn, id, company_id).await?;
        let pointing = transaction::pointing_at(&mut conn, id).await?;
        let listed: &[String] = if record.flag_active {
            &record.related_documents
        } else {
            &[]
        };
        Ok(LinkAudit::compute(id, listed, &pointing).into_result()?)
    }
}
