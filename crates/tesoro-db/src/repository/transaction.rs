//! # Transaction Repository
//!
//! Cash and bank payment transactions as seen by the ledger.
//!
//! The sales and treasury modules own these rows; the ledger only reads
//! them and writes two things back:
//! - `closing_session_id` when a session folds a transaction in
//! - `flag_reconciled` / `bank_reconcilement_id` when a reconcilement lists
//!   a bank transaction
//!
//! ```text
//!  pending (live)      closing_session_id IS NULL AND hash_offline IS NULL
//!  pending (offline)   closing_session_id IS NULL AND hash_offline IN (...)
//!  folded              closing_session_id = <session>
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tesoro_core::money::Money;
use tesoro_core::movement::{AdditionalInformation, MovementSource, SourceTransaction};
use tesoro_core::session::PendingTransactions;
use tesoro_core::types::{new_id, Currency, MovementType, TransactionKind};
use tesoro_core::validation::{validate_positive, validate_required};
use tesoro_core::DEFAULT_PAYMENT_METHOD;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

const TRANSACTION_COLUMNS: &str = r#"
    id, company_id, cash_register_id, currency, type_movement, amount,
    payment_method, concept, reference, document_number, counterparty,
    occurred_at, hash_offline, closing_session_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    company_id: String,
    cash_register_id: String,
    currency: String,
    type_movement: MovementType,
    amount: i64,
    payment_method: String,
    concept: Option<String>,
    reference: Option<String>,
    document_number: Option<String>,
    counterparty: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
    hash_offline: Option<String>,
    closing_session_id: Option<String>,
}

impl TransactionRow {
    fn into_source(self, kind: TransactionKind) -> DbResult<SourceTransaction> {
        let source = match kind {
            TransactionKind::Cash => MovementSource::Cash(self.id),
            TransactionKind::Bank => MovementSource::Bank(self.id),
        };
        Ok(SourceTransaction {
            source,
            company_id: self.company_id,
            cash_register_id: self.cash_register_id,
            currency: Currency::new(&self.currency)?,
            movement_type: self.type_movement,
            amount: Money::from_cents(self.amount),
            payment_method: self.payment_method,
            concept: self.concept,
            reference: self.reference,
            additional_information: AdditionalInformation {
                document_number: self.document_number,
                counterparty: self.counterparty,
                occurred_at: self.occurred_at,
            },
            hash_offline: self.hash_offline,
            closing_session_id: self.closing_session_id,
        })
    }
}

fn table(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Cash => "cash_transactions",
        TransactionKind::Bank => "bank_transactions",
    }
}

pub(crate) fn json_ids(ids: &[String]) -> DbResult<String> {
    Ok(serde_json::to_string(ids)?)
}

// =============================================================================
// Inputs
// =============================================================================

/// A payment recorded by the sales or treasury modules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPaymentTransaction {
    pub company_id: String,
    pub cash_register_id: String,
    pub currency: Option<Currency>,
    pub movement_type: Option<MovementType>,
    pub amount: Money,
    /// Blank falls back to the cash payment method.
    pub payment_method: String,
    pub concept: Option<String>,
    pub reference: Option<String>,
    pub additional_information: AdditionalInformation,
    pub hash_offline: Option<String>,
    /// Required for bank transactions.
    pub bank_account_id: Option<String>,
}

/// Reconciliation columns of a bank transaction.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ReconciliationFlag {
    pub id: String,
    pub flag_reconciled: bool,
    pub bank_reconcilement_id: Option<String>,
}

// =============================================================================
// Transaction-scoped helpers
// =============================================================================

async fn list_where(
    conn: &mut SqliteConnection,
    kind: TransactionKind,
    filter: &str,
    register_id: &str,
    currency: &Currency,
    hashes_json: Option<&str>,
) -> DbResult<Vec<SourceTransaction>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE cash_register_id = ?1 AND currency = ?2 AND closing_session_id IS NULL AND {} ORDER BY created_at, id",
        TRANSACTION_COLUMNS,
        table(kind),
        filter
    );
    let mut query = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(register_id)
        .bind(currency.as_str());
    if let Some(hashes) = hashes_json {
        query = query.bind(hashes);
    }
    let rows = query.fetch_all(&mut *conn).await?;

    rows.into_iter().map(|row| row.into_source(kind)).collect()
}

/// Live transactions not yet folded into any session.
pub(crate) async fn list_pending_for_closing(
    conn: &mut SqliteConnection,
    register_id: &str,
    currency: &Currency,
) -> DbResult<PendingTransactions> {
    let filter = "hash_offline IS NULL";
    Ok(PendingTransactions {
        cash: list_where(conn, TransactionKind::Cash, filter, register_id, currency, None).await?,
        bank: list_where(conn, TransactionKind::Bank, filter, register_id, currency, None).await?,
    })
}

/// Unfolded transactions captured offline under any of `hashes`.
pub(crate) async fn list_by_offline_hash(
    conn: &mut SqliteConnection,
    register_id: &str,
    currency: &Currency,
    hashes: &[String],
) -> DbResult<PendingTransactions> {
    let hashes_json = json_ids(hashes)?;
    let filter = "hash_offline IN (SELECT value FROM json_each(?3))";
    Ok(PendingTransactions {
        cash: list_where(conn, TransactionKind::Cash, filter, register_id, currency, Some(&hashes_json)).await?,
        bank: list_where(conn, TransactionKind::Bank, filter, register_id, currency, Some(&hashes_json)).await?,
    })
}

/// Marks transactions as folded into `session_id`.
///
/// Fails with `Conflict` if any of them was already folded elsewhere.
pub(crate) async fn tag_with_closing(
    conn: &mut SqliteConnection,
    kind: TransactionKind,
    ids: &[String],
    session_id: &str,
) -> DbResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE {} SET closing_session_id = ?1 WHERE closing_session_id IS NULL AND id IN (SELECT value FROM json_each(?2))",
        table(kind)
    );
    let result = sqlx::query(&sql)
        .bind(session_id)
        .bind(json_ids(ids)?)
        .execute(&mut *conn)
        .await?;

    let tagged = result.rows_affected();
    if tagged != ids.len() as u64 {
        return Err(DbError::conflict(
            "ClosingSession",
            session_id,
            format!(
                "{} of {} {} transactions were already folded into another session",
                ids.len() as u64 - tagged,
                ids.len(),
                kind.as_str()
            ),
        ));
    }
    debug!(session_id, kind = kind.as_str(), tagged, "Transactions tagged with closing");
    Ok(tagged)
}

/// Releases every transaction folded into `session_id`.
pub(crate) async fn untag_session(conn: &mut SqliteConnection, session_id: &str) -> DbResult<u64> {
    let mut released = 0;
    for kind in [TransactionKind::Cash, TransactionKind::Bank] {
        let sql = format!(
            "UPDATE {} SET closing_session_id = NULL WHERE closing_session_id = ?1",
            table(kind)
        );
        released += sqlx::query(&sql)
            .bind(session_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(released)
}

/// Flags bank transactions as reconciled by `reconcilement_id`.
///
/// ## Errors
/// - `NotFound` when an id does not exist for the company
/// - `Conflict` when an id is already reconciled by another record
pub(crate) async fn link_to_reconcilement(
    conn: &mut SqliteConnection,
    company_id: &str,
    ids: &[String],
    reconcilement_id: &str,
) -> DbResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let ids_json = json_ids(ids)?;
    let result = sqlx::query(
        r#"
        UPDATE bank_transactions
        SET flag_reconciled = 1, bank_reconcilement_id = ?1
        WHERE company_id = ?2
          AND id IN (SELECT value FROM json_each(?3))
          AND (bank_reconcilement_id IS NULL OR bank_reconcilement_id = ?1)
        "#,
    )
    .bind(reconcilement_id)
    .bind(company_id)
    .bind(&ids_json)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == ids.len() as u64 {
        debug!(reconcilement_id, linked = ids.len(), "Bank transactions linked");
        return Ok(());
    }

    let flags = flags_of(conn, company_id, ids).await?;
    for id in ids {
        match flags.iter().find(|f| &f.id == id) {
            None => return Err(DbError::not_found("BankTransaction", id)),
            Some(f) if f.bank_reconcilement_id.as_deref() != Some(reconcilement_id) => {
                return Err(DbError::conflict(
                    "BankTransaction",
                    id,
                    format!(
                        "already reconciled by {}",
                        f.bank_reconcilement_id.as_deref().unwrap_or("another record")
                    ),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Clears the reconciliation flag on `ids` still pointing at the record.
pub(crate) async fn unlink(
    conn: &mut SqliteConnection,
    ids: &[String],
    reconcilement_id: &str,
) -> DbResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        r#"
        UPDATE bank_transactions
        SET flag_reconciled = 0, bank_reconcilement_id = NULL
        WHERE bank_reconcilement_id = ?1
          AND id IN (SELECT value FROM json_each(?2))
        "#,
    )
    .bind(reconcilement_id)
    .bind(json_ids(ids)?)
    .execute(&mut *conn)
    .await?;

    debug!(reconcilement_id, unlinked = result.rows_affected(), "Bank transactions unlinked");
    Ok(result.rows_affected())
}

/// Clears the flag on every transaction pointing at the record.
pub(crate) async fn unlink_all(conn: &mut SqliteConnection, reconcilement_id: &str) -> DbResult<u64> {
    let result = sqlx::query(
        "UPDATE bank_transactions SET flag_reconciled = 0, bank_reconcilement_id = NULL WHERE bank_reconcilement_id = ?1",
    )
    .bind(reconcilement_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Ids of reconciled transactions pointing at the record.
pub(crate) async fn pointing_at(
    conn: &mut SqliteConnection,
    reconcilement_id: &str,
) -> DbResult<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM bank_transactions WHERE bank_reconcilement_id = ?1 AND flag_reconciled = 1 ORDER BY id",
    )
    .bind(reconcilement_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

async fn flags_of(
    conn: &mut SqliteConnection,
    company_id: &str,
    ids: &[String],
) -> DbResult<Vec<ReconciliationFlag>> {
    let flags = sqlx::query_as(
        r#"
        SELECT id, flag_reconciled, bank_reconcilement_id
        FROM bank_transactions
        WHERE company_id = ?1 AND id IN (SELECT value FROM json_each(?2))
        "#,
    )
    .bind(company_id)
    .bind(json_ids(ids)?)
    .fetch_all(&mut *conn)
    .await?;
    Ok(flags)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the payment transactions the ledger consumes.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Records a cash payment against a register.
    pub async fn record_cash(&self, input: &NewPaymentTransaction) -> DbResult<SourceTransaction> {
        self.record(TransactionKind::Cash, input).await
    }

    /// Records a bank payment (card, transfer, deposit) against a register.
    pub async fn record_bank(&self, input: &NewPaymentTransaction) -> DbResult<SourceTransaction> {
        self.record(TransactionKind::Bank, input).await
    }

    async fn record(
        &self,
        kind: TransactionKind,
        input: &NewPaymentTransaction,
    ) -> DbResult<SourceTransaction> {
        validate_required("company_id", &input.company_id)?;
        validate_required("cash_register_id", &input.cash_register_id)?;
        validate_positive("amount", input.amount)?;
        let currency = input.currency.clone().ok_or_else(|| {
            DbError::Validation(tesoro_core::ValidationError::Required {
                field: "currency".to_string(),
            })
        })?;
        let movement_type = input.movement_type.ok_or_else(|| {
            DbError::Validation(tesoro_core::ValidationError::Required {
                field: "movement_type".to_string(),
            })
        })?;
        if kind == TransactionKind::Bank {
            validate_required(
                "bank_account_id",
                input.bank_account_id.as_deref().unwrap_or_default(),
            )?;
        }
        let payment_method = match input.payment_method.trim() {
            "" => DEFAULT_PAYMENT_METHOD.to_string(),
            method => method.to_uppercase(),
        };

        let id = new_id();
        let info = &input.additional_information;
        let mut query = format!(
            "INSERT INTO {} (id, company_id, cash_register_id, currency, type_movement, amount, \
             payment_method, concept, reference, document_number, counterparty, occurred_at, \
             hash_offline, created_at",
            table(kind)
        );
        query.push_str(match kind {
            TransactionKind::Cash => ") VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            TransactionKind::Bank => {
                ", bank_account_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            }
        });

        let mut insert = sqlx::query(&query)
            .bind(&id)
            .bind(&input.company_id)
            .bind(&input.cash_register_id)
            .bind(currency.as_str())
            .bind(movement_type)
            .bind(input.amount.cents())
            .bind(&payment_method)
            .bind(&input.concept)
            .bind(&input.reference)
            .bind(&info.document_number)
            .bind(&info.counterparty)
            .bind(info.occurred_at)
            .bind(&input.hash_offline)
            .bind(Utc::now());
        if kind == TransactionKind::Bank {
            insert = insert.bind(&input.bank_account_id);
        }
        insert.execute(&self.pool).await?;

        info!(
            id = %id,
            kind = kind.as_str(),
            register_id = %input.cash_register_id,
            amount = input.amount.cents(),
            "Payment transaction recorded"
        );

        Ok(SourceTransaction {
            source: match kind {
                TransactionKind::Cash => MovementSource::Cash(id),
                TransactionKind::Bank => MovementSource::Bank(id),
            },
            company_id: input.company_id.clone(),
            cash_register_id: input.cash_register_id.clone(),
            currency,
            movement_type,
            amount: input.amount,
            payment_method,
            concept: input.concept.clone(),
            reference: input.reference.clone(),
            additional_information: input.additional_information.clone(),
            hash_offline: input.hash_offline.clone(),
            closing_session_id: None,
        })
    }

    pub async fn get(&self, source: &MovementSource) -> DbResult<SourceTransaction> {
        let kind = source.kind();
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", TRANSACTION_COLUMNS, table(kind));
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(source.id())
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| DbError::not_found("Transaction", source.id()))?
            .into_source(kind)
    }

    pub async fn list_pending_for_closing(
        &self,
        register_id: &str,
        currency: &Currency,
    ) -> DbResult<PendingTransactions> {
        let mut conn = self.pool.acquire().await?;
        list_pending_for_closing(&mut conn, register_id, currency).await
    }

    pub async fn list_by_offline_hash(
        &self,
        register_id: &str,
        currency: &Currency,
        hashes: &[String],
    ) -> DbResult<PendingTransactions> {
        let mut conn = self.pool.acquire().await?;
        list_by_offline_hash(&mut conn, register_id, currency, hashes).await
    }

    /// Reconciliation columns of one bank transaction.
    pub async fn reconciliation_of(&self, bank_transaction_id: &str) -> DbResult<ReconciliationFlag> {
        sqlx::query_as(
            "SELECT id, flag_reconciled, bank_reconcilement_id FROM bank_transactions WHERE id = ?1",
        )
        .bind(bank_transaction_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("BankTransaction", bank_transaction_id))
    }
}
