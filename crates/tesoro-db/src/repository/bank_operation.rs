//! # Bank Operation Repository
//!
//! Imported bank statement lines.
//!
//! ## Import Dedup
//! ```text
//!  line ──► INSERT ... ON CONFLICT (company_id, bank_account_id, number_operation) DO NOTHING
//!              │
//!              ├─ 1 row  ──► inserted
//!              └─ 0 rows ──► skipped (already stored, or earlier in this batch)
//! ```
//!
//! The whole batch is one transaction: a failing line leaves nothing behind.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tesoro_core::bank::{BankOperation, BankOperationReport, ImportBatch, ImportOutcome, OperationLink};
use tesoro_core::money::Money;
use tesoro_core::types::{new_id, MovementType};
use tesoro_core::validation::validate_required;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::transaction;

const SELECT_OPERATION: &str = r#"
    SELECT id, company_id, bank_id, bank_account_id, number_operation, type_movement,
           amount, date_operation, description, transaction_bank_id, reference_id, created_at
    FROM bank_operations
"#;

#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    id: String,
    company_id: String,
    bank_id: String,
    bank_account_id: String,
    number_operation: String,
    type_movement: MovementType,
    amount: i64,
    date_operation: NaiveDate,
    description: Option<String>,
    transaction_bank_id: Option<String>,
    reference_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<OperationRow> for BankOperation {
    fn from(row: OperationRow) -> Self {
        BankOperation {
            id: row.id,
            company_id: row.company_id,
            bank_id: row.bank_id,
            bank_account_id: row.bank_account_id,
            number_operation: row.number_operation,
            movement_type: row.type_movement,
            amount: Money::from_cents(row.amount),
            date_operation: row.date_operation,
            description: row.description,
            transaction_bank_id: row.transaction_bank_id,
            reference_id: row.reference_id,
            created_at: row.created_at,
        }
    }
}

/// Points a statement line at a reconcilement.
///
/// A line already matched under another reference is left alone and
/// reported as `Conflict`.
pub(crate) async fn link_to_reconcilement(
    conn: &mut SqliteConnection,
    company_id: &str,
    link: &OperationLink,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE bank_operations
        SET transaction_bank_id = COALESCE(?4, transaction_bank_id),
            reference_id = ?5,
            updated_at = ?6
        WHERE id = ?1 AND company_id = ?2 AND bank_account_id = ?3
          AND (reference_id IS NULL OR reference_id = ?5)
        "#,
    )
    .bind(&link.operation_id)
    .bind(company_id)
    .bind(&link.bank_account_id)
    .bind(&link.transaction_bank_id)
    .bind(&link.reference_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        debug!(operation_id = %link.operation_id, reference_id = ?link.reference_id, "Bank operation linked");
        return Ok(());
    }

    let exists: Option<String> = sqlx::query_scalar(
        "SELECT id FROM bank_operations WHERE id = ?1 AND company_id = ?2 AND bank_account_id = ?3",
    )
    .bind(&link.operation_id)
    .bind(company_id)
    .bind(&link.bank_account_id)
    .fetch_optional(&mut *conn)
    .await?;

    match exists {
        None => Err(DbError::not_found("BankOperation", &link.operation_id)),
        Some(_) => Err(DbError::conflict(
            "BankOperation",
            &link.operation_id,
            "already matched to another reference",
        )),
    }
}

/// Releases the statement lines matched to any of `transaction_bank_ids`.
pub(crate) async fn unlink_transactions(
    conn: &mut SqliteConnection,
    company_id: &str,
    transaction_bank_ids: &[String],
) -> DbResult<u64> {
    if transaction_bank_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        r#"
        UPDATE bank_operations
        SET transaction_bank_id = NULL, reference_id = NULL, updated_at = ?3
        WHERE company_id = ?1
          AND transaction_bank_id IN (SELECT value FROM json_each(?2))
        "#,
    )
    .bind(company_id)
    .bind(transaction::json_ids(transaction_bank_ids)?)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    debug!(released = result.rows_affected(), "Bank operations unmatched");
    Ok(result.rows_affected())
}

/// Releases every statement line matched to a reconcilement, by reference
/// or through one of its bank transactions.
pub(crate) async fn unlink_reconcilement(
    conn: &mut SqliteConnection,
    company_id: &str,
    reconcilement_id: &str,
    transaction_bank_ids: &[String],
) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE bank_operations
        SET transaction_bank_id = NULL, reference_id = NULL, updated_at = ?4
        WHERE company_id = ?1
          AND (reference_id = ?2
               OR transaction_bank_id IN (SELECT value FROM json_each(?3)))
        "#,
    )
    .bind(company_id)
    .bind(reconcilement_id)
    .bind(transaction::json_ids(transaction_bank_ids)?)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    debug!(reconcilement_id, released = result.rows_affected(), "Bank operations unmatched");
    Ok(result.rows_affected())
}

/// Repository for bank statement lines.
#[derive(Debug, Clone)]
pub struct BankOperationRepository {
    pool: SqlitePool,
}

impl BankOperationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        BankOperationRepository { pool }
    }

    /// Imports statement lines, skipping any whose number is already stored
    /// for the account. Safe to retry.
    pub async fn import_batch(&self, batch: &ImportBatch) -> DbResult<ImportOutcome> {
        batch.validate()?;

        let mut outcome = ImportOutcome::default();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for line in &batch.lines {
            let number = line.number_operation.trim();
            let result = sqlx::query(
                r#"
                INSERT INTO bank_operations (
                    id, company_id, bank_id, bank_account_id, number_operation, type_movement,
                    amount, date_operation, description, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                ON CONFLICT (company_id, bank_account_id, number_operation) DO NOTHING
                "#,
            )
            .bind(new_id())
            .bind(&batch.company_id)
            .bind(&batch.bank_id)
            .bind(&batch.bank_account_id)
            .bind(number)
            .bind(line.movement_type)
            .bind(line.amount.cents())
            .bind(line.date_operation)
            .bind(&line.description)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                outcome.inserted += 1;
            } else {
                outcome.skipped += 1;
                outcome.skipped_numbers.push(number.to_string());
            }
        }
        tx.commit().await?;

        info!(
            company_id = %batch.company_id,
            bank_account_id = %batch.bank_account_id,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            "Bank statement imported"
        );
        Ok(outcome)
    }

    pub async fn get(&self, id: &str, company_id: &str) -> DbResult<BankOperation> {
        let row: Option<OperationRow> =
            sqlx::query_as(&format!("{} WHERE id = ?1 AND company_id = ?2", SELECT_OPERATION))
                .bind(id)
                .bind(company_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(BankOperation::from)
            .ok_or_else(|| DbError::not_found("BankOperation", id))
    }

    pub async fn find_by_number(
        &self,
        company_id: &str,
        bank_account_id: &str,
        number_operation: &str,
    ) -> DbResult<Option<BankOperation>> {
        let row: Option<OperationRow> = sqlx::query_as(&format!(
            "{} WHERE company_id = ?1 AND bank_account_id = ?2 AND number_operation = ?3",
            SELECT_OPERATION
        ))
        .bind(company_id)
        .bind(bank_account_id)
        .bind(number_operation.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(BankOperation::from))
    }

    /// Lines of one account dated within `[from, to]`, oldest first.
    pub async fn report(
        &self,
        company_id: &str,
        bank_account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DbResult<BankOperationReport> {
        validate_required("bank_account_id", bank_account_id)?;

        let rows: Vec<OperationRow> = sqlx::query_as(&format!(
            "{} WHERE company_id = ?1 AND bank_account_id = ?2 AND date_operation BETWEEN ?3 AND ?4 \
             ORDER BY date_operation, number_operation",
            SELECT_OPERATION
        ))
        .bind(company_id)
        .bind(bank_account_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let operations = rows.into_iter().map(BankOperation::from).collect();
        Ok(BankOperationReport::from_operations(bank_account_id, operations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use tesoro_core::bank::NewBankOperation;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn line(number: &str, movement_type: MovementType, cents: i64, day: u32) -> NewBankOperation {
        NewBankOperation {
            number_operation: number.to_string(),
            movement_type,
            amount: Money::from_cents(cents),
            date_operation: date(day),
            description: Some("DEPOSITO".to_string()),
        }
    }

    fn batch(lines: Vec<NewBankOperation>) -> ImportBatch {
        ImportBatch {
            company_id: "c-1".to_string(),
            bank_id: "bcp".to_string(),
            bank_account_id: "A1".to_string(),
            lines,
        }
    }

    #[tokio::test]
    async fn test_reimport_skips_known_numbers() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let input = batch(vec![line("OP-1001", MovementType::Income, 50_000, 1)]);

        let first = db.bank_operations().import_batch(&input).await.unwrap();
        assert_eq!((first.inserted, first.skipped), (1, 0));

        let second = db.bank_operations().import_batch(&input).await.unwrap();
        assert_eq!((second.inserted, second.skipped), (0, 1));
        assert_eq!(second.skipped_numbers, vec!["OP-1001".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicates_within_batch_and_across_accounts() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let outcome = db
            .bank_operations()
            .import_batch(&batch(vec![
                line("OP-1", MovementType::Income, 100, 1),
                line("OP-1", MovementType::Income, 100, 1),
                line("OP-2", MovementType::Expense, 40, 2),
            ]))
            .await
            .unwrap();
        assert_eq!((outcome.inserted, outcome.skipped), (2, 1));

        // Same number on another account is a different line
        let mut other = batch(vec![line("OP-1", MovementType::Income, 100, 1)]);
        other.bank_account_id = "A2".to_string();
        let outcome = db.bank_operations().import_batch(&other).await.unwrap();
        assert_eq!(outcome.inserted, 1);
    }

    #[tokio::test]
    async fn test_invalid_line_imports_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let result = db
            .bank_operations()
            .import_batch(&batch(vec![
                line("OP-1", MovementType::Income, 100, 1),
                line("OP-2", MovementType::Income, 0, 1),
            ]))
            .await;
        assert!(matches!(result, Err(DbError::Validation(_))));

        let found = db.bank_operations().find_by_number("c-1", "A1", "OP-1").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_report_totals_and_range() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.bank_operations()
            .import_batch(&batch(vec![
                line("OP-1", MovementType::Income, 10_000, 1),
                line("OP-2", MovementType::Expense, 2_500, 5),
                line("OP-3", MovementType::Income, 99_999, 20),
            ]))
            .await
            .unwrap();

        let report = db
            .bank_operations()
            .report("c-1", "A1", date(1), date(10))
            .await
            .unwrap();
        assert_eq!(report.operations.len(), 2);
        assert_eq!(report.total_income.cents(), 10_000);
        assert_eq!(report.total_expense.cents(), 2_500);
        assert_eq!(report.unmatched, 2);
    }

    #[tokio::test]
    async fn test_link_refuses_foreign_reference() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.bank_operations()
            .import_batch(&batch(vec![line("OP-1", MovementType::Income, 100, 1)]))
            .await
            .unwrap();
        let op = db
            .bank_operations()
            .find_by_number("c-1", "A1", "OP-1")
            .await
            .unwrap()
            .unwrap();

        let link = |reference: &str| OperationLink {
            operation_id: op.id.clone(),
            transaction_bank_id: None,
            reference_id: Some(reference.to_string()),
            bank_account_id: "A1".to_string(),
        };

        let mut conn = db.pool().acquire().await.unwrap();
        link_to_reconcilement(&mut conn, "c-1", &link("rec-1")).await.unwrap();
        link_to_reconcilement(&mut conn, "c-1", &link("rec-1")).await.unwrap();
        let other = link_to_reconcilement(&mut conn, "c-1", &link("rec-2")).await;
        assert!(matches!(other, Err(DbError::Conflict { .. })));
        let foreign = link_to_reconcilement(&mut conn, "c-9", &link("rec-1")).await;
        assert!(matches!(foreign, Err(DbError::NotFound { .. })));
        drop(conn);

        let stored = db.bank_operations().get(&op.id, "c-1").await.unwrap();
        assert_eq!(stored.reference_id.as_deref(), Some("rec-1"));
        assert!(stored.is_matched());
    }
}
