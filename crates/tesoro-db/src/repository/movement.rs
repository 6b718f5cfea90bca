//! # Movement Repository
//!
//! The cash movement trail: one immutable row per transaction folded into a
//! closing session. Rows are only ever inserted, or soft-deleted when a
//! closing is voided.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tesoro_core::money::Money;
use tesoro_core::movement::{AdditionalInformation, CashMovementRecord, MovementSource};
use tesoro_core::types::{MovementType, TransactionKind};
use tracing::debug;

use crate::error::{DbError, DbResult};

// 12 binds per row keeps every chunk well under SQLite's variable limit.
const INSERT_CHUNK: usize = 500;

const SELECT_MOVEMENT: &str = r#"
    SELECT id, closing_session_id, company_id, type_transaction, transaction_id,
           transaction_bank_id, type_movement, amount, payment_method, concept,
           reference, additional_information, created_at
    FROM cash_movements
"#;

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: String,
    closing_session_id: String,
    company_id: String,
    type_transaction: TransactionKind,
    transaction_id: Option<String>,
    transaction_bank_id: Option<String>,
    type_movement: MovementType,
    amount: i64,
    payment_method: String,
    concept: Option<String>,
    reference: Option<String>,
    additional_information: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for CashMovementRecord {
    type Error = DbError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let source = MovementSource::from_columns(
            row.type_transaction,
            row.transaction_id,
            row.transaction_bank_id,
        )
        .ok_or_else(|| {
            DbError::ConsistencyViolation(format!("movement {} has an illegal source pair", row.id))
        })?;
        let additional_information: AdditionalInformation =
            serde_json::from_str(&row.additional_information)?;

        Ok(CashMovementRecord {
            id: row.id,
            closing_session_id: row.closing_session_id,
            company_id: row.company_id,
            source,
            movement_type: row.type_movement,
            amount: Money::from_cents(row.amount),
            payment_method: row.payment_method,
            concept: row.concept,
            reference: row.reference,
            additional_information,
            created_at: row.created_at,
        })
    }
}

/// Inserts the records of one fold-in.
///
/// A second record for the same source in the same live session hits the
/// per-session unique index and fails the whole transaction.
pub(crate) async fn generate(
    conn: &mut SqliteConnection,
    records: &[CashMovementRecord],
) -> DbResult<u64> {
    let mut inserted = 0;
    for chunk in records.chunks(INSERT_CHUNK) {
        let snapshots = chunk
            .iter()
            .map(|r| serde_json::to_string(&r.additional_information))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO cash_movements (id, closing_session_id, company_id, type_transaction, \
             transaction_id, transaction_bank_id, type_movement, amount, payment_method, \
             concept, reference, additional_information, created_at) ",
        );
        builder.push_values(chunk.iter().zip(snapshots), |mut b, (record, snapshot)| {
            let (transaction_id, transaction_bank_id) = record.source.columns();
            b.push_bind(record.id.clone())
                .push_bind(record.closing_session_id.clone())
                .push_bind(record.company_id.clone())
                .push_bind(record.source.kind())
                .push_bind(transaction_id.map(str::to_string))
                .push_bind(transaction_bank_id.map(str::to_string))
                .push_bind(record.movement_type)
                .push_bind(record.amount.cents())
                .push_bind(record.payment_method.clone())
                .push_bind(record.concept.clone())
                .push_bind(record.reference.clone())
                .push_bind(snapshot)
                .push_bind(record.created_at);
        });

        inserted += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    debug!(inserted, "Cash movements generated");
    Ok(inserted)
}

pub(crate) async fn list_for_session(
    conn: &mut SqliteConnection,
    session_id: &str,
    include_deleted: bool,
) -> DbResult<Vec<CashMovementRecord>> {
    let rows: Vec<MovementRow> = sqlx::query_as(&format!(
        "{} WHERE closing_session_id = ?1 AND (deleted_at IS NULL OR ?2) ORDER BY created_at, rowid",
        SELECT_MOVEMENT
    ))
    .bind(session_id)
    .bind(include_deleted)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(CashMovementRecord::try_from).collect()
}

pub(crate) async fn soft_delete_for_session(
    conn: &mut SqliteConnection,
    session_id: &str,
    now: DateTime<Utc>,
) -> DbResult<u64> {
    let result = sqlx::query(
        "UPDATE cash_movements SET deleted_at = ?2 WHERE closing_session_id = ?1 AND deleted_at IS NULL",
    )
    .bind(session_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Read access to the movement trail.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    /// Live movements of a session in fold-in order.
    pub async fn list_by_session(&self, session_id: &str) -> DbResult<Vec<CashMovementRecord>> {
        let mut conn = self.pool.acquire().await?;
        list_for_session(&mut conn, session_id, false).await
    }

    /// Every movement of a session, voided ones included.
    pub async fn list_history(&self, session_id: &str) -> DbResult<Vec<CashMovementRecord>> {
        let mut conn = self.pool.acquire().await?;
        list_for_session(&mut conn, session_id, true).await
    }

    /// Live movement folded from a given transaction, if any.
    pub async fn find_by_source(&self, source: &MovementSource) -> DbResult<Option<CashMovementRecord>> {
        let column = match source.kind() {
            TransactionKind::Cash => "transaction_id",
            TransactionKind::Bank => "transaction_bank_id",
        };
        let row: Option<MovementRow> = sqlx::query_as(&format!(
            "{} WHERE {} = ?1 AND deleted_at IS NULL",
            SELECT_MOVEMENT, column
        ))
        .bind(source.id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CashMovementRecord::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use tesoro_core::register::NewCashRegister;
    use tesoro_core::session::OpenSession;
    use tesoro_core::types::Currency;

    async fn open_session(db: &Database) -> (String, String) {
        let register = db
            .registers()
            .create(&NewCashRegister {
                company_id: "c-1".to_string(),
                subsidiary_id: "sub-1".to_string(),
                name: "Caja 1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let session = db
            .sessions()
            .open(&OpenSession {
                cash_register_id: register.id.clone(),
                currency: Currency::new("PEN").unwrap(),
                opened_by: "emp-1".to_string(),
                terminal_id: None,
                start_amount: Some(Money::zero()),
            })
            .await
            .unwrap();
        (register.id, session.id)
    }

    fn record(session_id: &str, source: MovementSource, cents: i64) -> CashMovementRecord {
        CashMovementRecord {
            id: tesoro_core::types::new_id(),
            closing_session_id: session_id.to_string(),
            company_id: "c-1".to_string(),
            source,
            movement_type: MovementType::Income,
            amount: Money::from_cents(cents),
            payment_method: "CASH".to_string(),
            concept: Some("venta".to_string()),
            reference: None,
            additional_information: AdditionalInformation {
                document_number: Some("B001-1".to_string()),
                ..Default::default()
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_generate_and_list_keeps_snapshot() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (_, session_id) = open_session(&db).await;

        let records = vec![
            record(&session_id, MovementSource::Cash("tx-1".into()), 5000),
            record(&session_id, MovementSource::Bank("bt-1".into()), 700),
        ];
        let mut conn = db.pool().acquire().await.unwrap();
        assert_eq!(generate(&mut conn, &records).await.unwrap(), 2);
        drop(conn);

        let listed = db.movements().list_by_session(&session_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].source, MovementSource::Cash("tx-1".into()));
        assert_eq!(
            listed[0].additional_information.document_number.as_deref(),
            Some("B001-1")
        );

        let found = db
            .movements()
            .find_by_source(&MovementSource::Bank("bt-1".into()))
            .await
            .unwrap();
        assert_eq!(found.map(|m| m.amount.cents()), Some(700));
    }

    #[tokio::test]
    async fn test_same_source_twice_in_session_fails() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (_, session_id) = open_session(&db).await;

        let records = vec![
            record(&session_id, MovementSource::Cash("tx-1".into()), 5000),
            record(&session_id, MovementSource::Cash("tx-1".into()), 5000),
        ];
        let mut conn = db.pool().acquire().await.unwrap();
        let result = generate(&mut conn, &records).await;
        assert!(matches!(result, Err(DbError::UniqueViolation { .. })));
    }

    #[tokio::test]
    async fn test_soft_deleted_rows_leave_live_listing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (_, session_id) = open_session(&db).await;

        let records = vec![record(&session_id, MovementSource::Cash("tx-1".into()), 5000)];
        let mut conn = db.pool().acquire().await.unwrap();
        generate(&mut conn, &records).await.unwrap();
        assert_eq!(
            soft_delete_for_session(&mut conn, &session_id, Utc::now()).await.unwrap(),
            1
        );
        drop(conn);

        assert!(db.movements().list_by_session(&session_id).await.unwrap().is_empty());
        assert_eq!(db.movements().list_history(&session_id).await.unwrap().len(), 1);
    }
}
