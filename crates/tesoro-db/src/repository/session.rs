//! # Closing Session Repository
//!
//! Opening, closing and offline replay of register sessions.
//!
//! ## Close Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       close(session_id)                                 │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    claim register row            (write lock, waits on busy_timeout)   │
//! │    re-read session ── closed? ──► Conflict, rollback                   │
//! │    list pending cash + bank transactions                                │
//! │    tag them with the session id  (already tagged? ──► Conflict)        │
//! │    build + insert movement records                                      │
//! │    end = start + Σincome − Σexpense                                     │
//! │    stamp closed_at / closed_by / end / reported                         │
//! │    balance[currency] += net, state[currency] = closed                  │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error drops the transaction, so a failed close leaves no trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tesoro_core::money::Money;
use tesoro_core::movement::{build_from, CashMovementRecord, FoldTotals};
use tesoro_core::session::{
    ClosingSession, CloseSession, OfflineSession, OpenSession, PendingTransactions, SessionState,
};
use tesoro_core::summary::SessionSummary;
use tesoro_core::types::{new_id, Currency, RegisterState, TransactionKind};
use tesoro_core::validation::{validate_accepted_currency, validate_non_negative, validate_unique_ids};
use tesoro_core::{ValidationError, MAX_OFFLINE_SESSIONS};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::{movement, register, transaction};

const SELECT_SESSION: &str = r#"
    SELECT id, company_id, cash_register_id, currency, terminal_id, opened_by,
           opened_at, start_amount, register_information, hash_offline,
           closed_at, closed_by, end_amount, reported_end_amount, voided_at
    FROM closing_sessions
"#;

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    company_id: String,
    cash_register_id: String,
    currency: String,
    terminal_id: Option<String>,
    opened_by: String,
    opened_at: DateTime<Utc>,
    start_amount: i64,
    register_information: String,
    hash_offline: Option<String>,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<String>,
    end_amount: Option<i64>,
    reported_end_amount: Option<i64>,
    voided_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for ClosingSession {
    type Error = DbError;

    fn try_from(row: SessionRow) -> DbResult<Self> {
        let state = match (row.closed_at, row.closed_by, row.end_amount) {
            (None, None, None) => SessionState::Open,
            (Some(closed_at), Some(closed_by), Some(end_amount)) => SessionState::Closed {
                closed_at,
                closed_by,
                end_amount: Money::from_cents(end_amount),
                reported_end_amount: row.reported_end_amount.map(Money::from_cents),
                voided_at: row.voided_at,
            },
            _ => {
                return Err(DbError::ConsistencyViolation(format!(
                    "session {} has partial closing data",
                    row.id
                )))
            }
        };

        Ok(ClosingSession {
            register_information: serde_json::from_str(&row.register_information)?,
            currency: Currency::new(&row.currency)?,
            id: row.id,
            company_id: row.company_id,
            cash_register_id: row.cash_register_id,
            terminal_id: row.terminal_id,
            opened_by: row.opened_by,
            opened_at: row.opened_at,
            start_amount: Money::from_cents(row.start_amount),
            hash_offline: row.hash_offline,
            state,
        })
    }
}

/// Result of an offline batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineOutcome {
    /// Sessions written by this call.
    pub created: Vec<ClosingSession>,
    /// Sessions already stored under the same hash and payload.
    pub replayed: Vec<ClosingSession>,
}

// =============================================================================
// Transaction-scoped helpers
// =============================================================================

async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<ClosingSession>> {
    let row: Option<SessionRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_SESSION))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(ClosingSession::try_from).transpose()
}

async fn fetch_required(conn: &mut SqliteConnection, id: &str) -> DbResult<ClosingSession> {
    fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("ClosingSession", id))
}

async fn fetch_open(
    conn: &mut SqliteConnection,
    register_id: &str,
    currency: &Currency,
) -> DbResult<Option<ClosingSession>> {
    let row: Option<SessionRow> = sqlx::query_as(&format!(
        "{} WHERE cash_register_id = ?1 AND currency = ?2 AND closed_at IS NULL",
        SELECT_SESSION
    ))
    .bind(register_id)
    .bind(currency.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(ClosingSession::try_from).transpose()
}

async fn fetch_by_hash(
    conn: &mut SqliteConnection,
    register_id: &str,
    hash: &str,
) -> DbResult<Option<ClosingSession>> {
    let row: Option<SessionRow> = sqlx::query_as(&format!(
        "{} WHERE cash_register_id = ?1 AND hash_offline = ?2",
        SELECT_SESSION
    ))
    .bind(register_id)
    .bind(hash)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(ClosingSession::try_from).transpose()
}

/// Claims the register owning `session_id`.
async fn claim_session_register(conn: &mut SqliteConnection, session_id: &str) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE cash_registers
        SET version = version + 1, updated_at = ?2
        WHERE id = (SELECT cash_register_id FROM closing_sessions WHERE id = ?1)
        "#,
    )
    .bind(session_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("ClosingSession", session_id));
    }
    Ok(())
}

/// Tags `pending` with the session and writes its movement trail.
async fn fold_in(
    conn: &mut SqliteConnection,
    session_id: &str,
    pending: &PendingTransactions,
    records: &[CashMovementRecord],
) -> DbResult<()> {
    for kind in [TransactionKind::Cash, TransactionKind::Bank] {
        transaction::tag_with_closing(conn, kind, &pending.ids_of(kind), session_id).await?;
    }
    movement::generate(conn, records).await?;
    Ok(())
}

fn open_conflict(register_id: &str, currency: &Currency) -> DbError {
    DbError::conflict(
        "CashRegister",
        register_id,
        format!("a {} session is already open", currency),
    )
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for closing session operations.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
    accepted_currencies: Arc<[Currency]>,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool, accepted_currencies: Arc<[Currency]>) -> Self {
        SessionRepository {
            pool,
            accepted_currencies,
        }
    }

    /// Opens a session on a register and currency.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown register
    /// - `Rejected` for an inactive register
    /// - `Conflict` when a session is already open for the pair
    /// - `Validation` for a currency outside the accepted set, or a negative
    ///   start amount (explicit or carried from the balance)
    pub async fn open(&self, input: &OpenSession) -> DbResult<ClosingSession> {
        input.validate()?;
        validate_accepted_currency(&input.currency, &self.accepted_currencies)?;

        let register_id = input.cash_register_id.as_str();
        let currency = &input.currency;

        let mut tx = self.pool.begin().await?;
        register::claim(&mut tx, register_id).await?;
        let cash_register = register::fetch_required(&mut tx, register_id).await?;
        cash_register.ensure_can_open()?;

        if fetch_open(&mut tx, register_id, currency).await?.is_some() {
            return Err(open_conflict(register_id, currency));
        }

        let start_amount = input
            .start_amount
            .unwrap_or_else(|| cash_register.balance_of(currency));
        validate_non_negative("start_amount", start_amount)?;

        let id = new_id();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO closing_sessions (
                id, company_id, cash_register_id, currency, terminal_id, opened_by,
                opened_at, start_amount, register_information, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '{}', ?7, ?7)
            "#,
        )
        .bind(&id)
        .bind(&cash_register.company_id)
        .bind(register_id)
        .bind(currency.as_str())
        .bind(&input.terminal_id)
        .bind(&input.opened_by)
        .bind(now)
        .bind(start_amount.cents())
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => open_conflict(register_id, currency),
            other => other,
        })?;

        register::set_state(&mut tx, register_id, currency, RegisterState::Opened).await?;
        let session = fetch_required(&mut tx, &id).await?;
        tx.commit().await?;

        info!(
            session_id = %session.id,
            register_id,
            %currency,
            start_amount = start_amount.cents(),
            opened_by = %input.opened_by,
            "Closing session opened"
        );
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> DbResult<ClosingSession> {
        let mut conn = self.pool.acquire().await?;
        fetch_required(&mut conn, id).await
    }

    /// Gets a session only if it belongs to `company_id`.
    pub async fn get_for_company(&self, id: &str, company_id: &str) -> DbResult<ClosingSession> {
        let session = self.get(id).await?;
        if session.company_id != company_id {
            return Err(DbError::not_found("ClosingSession", id));
        }
        Ok(session)
    }

    pub async fn find_open(
        &self,
        register_id: &str,
        currency: &Currency,
    ) -> DbResult<Option<ClosingSession>> {
        let mut conn = self.pool.acquire().await?;
        fetch_open(&mut conn, register_id, currency).await
    }

    /// Sessions of a register, newest first. Voided closings are history
    /// only when `include_voided` is set.
    pub async fn list_by_register(
        &self,
        register_id: &str,
        include_voided: bool,
    ) -> DbResult<Vec<ClosingSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "{} WHERE cash_register_id = ?1 AND (voided_at IS NULL OR ?2) ORDER BY opened_at DESC, id",
            SELECT_SESSION
        ))
        .bind(register_id)
        .bind(include_voided)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ClosingSession::try_from).collect()
    }

    /// Transactions that `close` would fold into the session. Read-only.
    ///
    /// ## Errors
    /// `Conflict` when the session is already closed.
    pub async fn attach_pending_transactions(&self, session_id: &str) -> DbResult<PendingTransactions> {
        let mut conn = self.pool.acquire().await?;
        let session = fetch_required(&mut conn, session_id).await?;
        session.ensure_open()?;

        let pending =
            transaction::list_pending_for_closing(&mut conn, &session.cash_register_id, &session.currency)
                .await?;
        debug!(session_id, pending = pending.len(), "Pending transactions listed");
        Ok(pending)
    }

    /// Closes a session in one all-or-nothing transaction.
    ///
    /// A reported amount is stored next to the computed end amount and never
    /// replaces it.
    pub async fn close(&self, session_id: &str, input: &CloseSession) -> DbResult<ClosingSession> {
        input.validate()?;

        let mut tx = self.pool.begin().await?;
        claim_session_register(&mut tx, session_id).await?;
        let session = fetch_required(&mut tx, session_id).await?;
        session.ensure_open()?;

        let pending =
            transaction::list_pending_for_closing(&mut tx, &session.cash_register_id, &session.currency)
                .await?;
        let now = Utc::now();
        let records = build_from(&session.id, &session.company_id, &pending.all(), now);
        fold_in(&mut tx, &session.id, &pending, &records).await?;
        let totals = FoldTotals::from_records(&records);
        let end_amount = totals.end_amount(session.start_amount);

        let result = sqlx::query(
            r#"
            UPDATE closing_sessions
            SET closed_at = ?2, closed_by = ?3, end_amount = ?4, reported_end_amount = ?5,
                register_information = ?6, updated_at = ?2
            WHERE id = ?1 AND closed_at IS NULL
            "#,
        )
        .bind(&session.id)
        .bind(now)
        .bind(&input.closed_by)
        .bind(end_amount.cents())
        .bind(input.reported_end_amount.map(|m| m.cents()))
        .bind(serde_json::to_string(&totals.by_payment_method)?)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::conflict("ClosingSession", session_id, "session is already closed"));
        }

        register::apply_delta(&mut tx, &session.cash_register_id, &session.currency, totals.net())
            .await?;
        register::set_state(
            &mut tx,
            &session.cash_register_id,
            &session.currency,
            RegisterState::Closed,
        )
        .await?;

        let closed = fetch_required(&mut tx, session_id).await?;
        tx.commit().await?;

        if let Some(variance) = closed.variance().filter(|v| !v.is_zero()) {
            warn!(
                session_id,
                variance = variance.cents(),
                "Reported end amount differs from computed"
            );
        }
        info!(
            session_id,
            register_id = %session.cash_register_id,
            folded = pending.len(),
            income = totals.income.cents(),
            expense = totals.expense.cents(),
            end_amount = end_amount.cents(),
            "Closing session closed"
        );
        Ok(closed)
    }

    /// Replays sessions captured by an offline terminal, in one transaction.
    ///
    /// Each session folds in the transactions captured under its hash.
    /// A hash already stored with the same payload is returned as replayed;
    /// with a different payload, or voided since, the batch fails with
    /// `Conflict`. Offline sessions adjust the balance but leave the
    /// register's open/closed state alone.
    pub async fn create_offline(
        &self,
        register_id: &str,
        currency: &Currency,
        sessions: &[OfflineSession],
    ) -> DbResult<OfflineOutcome> {
        if sessions.len() > MAX_OFFLINE_SESSIONS {
            return Err(ValidationError::OutOfRange {
                field: "sessions".to_string(),
                min: 0,
                max: MAX_OFFLINE_SESSIONS as i64,
            }
            .into());
        }
        for session in sessions {
            session.validate()?;
        }
        let hashes: Vec<String> = sessions.iter().map(|s| s.hash_offline.clone()).collect();
        validate_unique_ids("hash_offline", &hashes)?;
        validate_accepted_currency(currency, &self.accepted_currencies)?;

        let mut tx = self.pool.begin().await?;
        register::claim(&mut tx, register_id).await?;
        let cash_register = register::fetch_required(&mut tx, register_id).await?;
        cash_register.ensure_can_open()?;

        let mut outcome = OfflineOutcome::default();
        let mut net = Money::zero();
        for offline in sessions {
            if let Some(stored) = fetch_by_hash(&mut tx, register_id, &offline.hash_offline).await? {
                if stored.is_voided() {
                    return Err(DbError::conflict(
                        "ClosingSession",
                        &stored.id,
                        format!("offline session {} was voided", offline.hash_offline),
                    ));
                }
                if stored.currency != *currency || !offline.matches(&stored) {
                    return Err(DbError::conflict(
                        "ClosingSession",
                        &stored.id,
                        format!("offline session {} resubmitted with a different payload", offline.hash_offline),
                    ));
                }
                debug!(hash_offline = %offline.hash_offline, "Offline session already stored");
                outcome.replayed.push(stored);
                continue;
            }

            let pending = transaction::list_by_offline_hash(
                &mut tx,
                register_id,
                currency,
                std::slice::from_ref(&offline.hash_offline),
            )
            .await?;
            let id = new_id();
            let records = build_from(&id, &cash_register.company_id, &pending.all(), offline.closed_at);
            let totals = FoldTotals::from_records(&records);
            let end_amount = totals.end_amount(offline.start_amount);

            let now = Utc::now();
            sqlx::query(
                r#"
                INSERT INTO closing_sessions (
                    id, company_id, cash_register_id, currency, terminal_id, opened_by,
                    opened_at, start_amount, register_information, hash_offline,
                    closed_at, closed_by, end_amount, reported_end_amount,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
                "#,
            )
            .bind(&id)
            .bind(&cash_register.company_id)
            .bind(register_id)
            .bind(currency.as_str())
            .bind(&offline.terminal_id)
            .bind(&offline.opened_by)
            .bind(offline.opened_at)
            .bind(offline.start_amount.cents())
            .bind(serde_json::to_string(&totals.by_payment_method)?)
            .bind(&offline.hash_offline)
            .bind(offline.closed_at)
            .bind(&offline.closed_by)
            .bind(end_amount.cents())
            .bind(offline.reported_end_amount.map(|m| m.cents()))
            .bind(now)
            .execute(&mut *tx)
            .await?;

            fold_in(&mut tx, &id, &pending, &records).await?;
            register::apply_delta(&mut tx, register_id, currency, totals.net()).await?;
            net += totals.net();

            outcome.created.push(fetch_required(&mut tx, &id).await?);
        }
        tx.commit().await?;

        info!(
            register_id,
            %currency,
            created = outcome.created.len(),
            replayed = outcome.replayed.len(),
            net = net.cents(),
            "Offline sessions synchronized"
        );
        Ok(outcome)
    }

    /// Totals, payment method breakdown and conservation check of a session.
    ///
    /// An open session is summarized from the transactions a close would
    /// fold in right now; nothing is written. A voided session is summarized
    /// from its voided movements.
    pub async fn report_summary(&self, session_id: &str) -> DbResult<SessionSummary> {
        let mut conn = self.pool.acquire().await?;
        let session = fetch_required(&mut conn, session_id).await?;
        let records = if session.is_open() {
            let pending = transaction::list_pending_for_closing(
                &mut conn,
                &session.cash_register_id,
                &session.currency,
            )
            .await?;
            build_from(&session.id, &session.company_id, &pending.all(), Utc::now())
        } else {
            movement::list_for_session(&mut conn, session_id, session.is_voided()).await?
        };
        Ok(SessionSummary::build(&session, &records)?)
    }

    /// Rolls back a closing: soft-deletes its movements, releases its
    /// transactions and reverses its net effect on the balance.
    ///
    /// ## Errors
    /// `Conflict` when the session is open or already voided.
    pub async fn void_closing(&self, session_id: &str) -> DbResult<ClosingSession> {
        let mut tx = self.pool.begin().await?;
        claim_session_register(&mut tx, session_id).await?;
        let session = fetch_required(&mut tx, session_id).await?;
        if session.is_open() {
            return Err(DbError::conflict("ClosingSession", session_id, "session is not closed"));
        }
        if session.is_voided() {
            return Err(DbError::conflict("ClosingSession", session_id, "session is already voided"));
        }

        let records = movement::list_for_session(&mut tx, session_id, false).await?;
        let net = FoldTotals::from_records(&records).net();
        let now = Utc::now();

        let removed = movement::soft_delete_for_session(&mut tx, session_id, now).await?;
        let released = transaction::untag_session(&mut tx, session_id).await?;
        register::apply_delta(&mut tx, &session.cash_register_id, &session.currency, -net).await?;
        sqlx::query("UPDATE closing_sessions SET voided_at = ?2, updated_at = ?2 WHERE id = ?1")
            .bind(session_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let voided = fetch_required(&mut tx, session_id).await?;
        tx.commit().await?;

        info!(
            session_id,
            register_id = %session.cash_register_id,
            removed,
            released,
            reversed = net.cents(),
            "Closing voided"
        );
        Ok(voided)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::transaction::NewPaymentTransaction;
    use chrono::Duration;
    use tesoro_core::register::NewCashRegister;
    use tesoro_core::types::MovementType;

    fn pen() -> Currency {
        Currency::new("PEN").unwrap()
    }

    async fn setup(balance: i64) -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
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
        if balance != 0 {
            db.registers()
                .reset_balance(&register.id, &pen(), Money::from_cents(balance))
                .await
                .unwrap();
        }
        (db, register.id)
    }

    fn open_input(register_id: &str, start: Option<i64>) -> OpenSession {
        OpenSession {
            cash_register_id: register_id.to_string(),
            currency: pen(),
            opened_by: "emp-1".to_string(),
            terminal_id: Some("pos-1".to_string()),
            start_amount: start.map(Money::from_cents),
        }
    }

    fn close_input(reported: Option<i64>) -> CloseSession {
        CloseSession {
            closed_by: "emp-2".to_string(),
            reported_end_amount: reported.map(Money::from_cents),
        }
    }

    async fn record(
        db: &Database,
        register_id: &str,
        kind: TransactionKind,
        movement_type: MovementType,
        cents: i64,
        hash: Option<&str>,
    ) -> String {
        let input = NewPaymentTransaction {
            company_id: "c-1".to_string(),
            cash_register_id: register_id.to_string(),
            currency: Some(pen()),
            movement_type: Some(movement_type),
            amount: Money::from_cents(cents),
            payment_method: match kind {
                TransactionKind::Cash => "CASH".to_string(),
                TransactionKind::Bank => "VISA".to_string(),
            },
            hash_offline: hash.map(str::to_string),
            bank_account_id: Some("A1".to_string()),
            ..Default::default()
        };
        let tx = match kind {
            TransactionKind::Cash => db.transactions().record_cash(&input).await.unwrap(),
            TransactionKind::Bank => db.transactions().record_bank(&input).await.unwrap(),
        };
        tx.source.id().to_string()
    }

    #[tokio::test]
    async fn test_close_conserves_balance() {
        let (db, register_id) = setup(10_000).await;
        let session = db.sessions().open(&open_input(&register_id, None)).await.unwrap();
        assert_eq!(session.start_amount.cents(), 10_000);

        record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 5_000, None).await;
        record(&db, &register_id, TransactionKind::Cash, MovementType::Expense, 2_000, None).await;

        let closed = db.sessions().close(&session.id, &close_input(None)).await.unwrap();
        assert_eq!(closed.end_amount(), Some(Money::from_cents(13_000)));

        let register = db.registers().get(&register_id).await.unwrap();
        assert_eq!(register.balance_of(&pen()).cents(), 13_000);
        assert_eq!(register.state_of(&pen()), RegisterState::Closed);

        let summary = db.sessions().report_summary(&session.id).await.unwrap();
        assert_eq!(summary.total_income.cents(), 5_000);
        assert_eq!(summary.total_expense.cents(), 2_000);
        assert_eq!(summary.movement_count, 2);
    }

    #[tokio::test]
    async fn test_open_session_summary_previews_pending() {
        let (db, register_id) = setup(0).await;
        let session = db.sessions().open(&open_input(&register_id, None)).await.unwrap();
        record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 5_000, None).await;
        record(&db, &register_id, TransactionKind::Bank, MovementType::Income, 1_500, None).await;
        // Captured offline, belongs to another session
        record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 9_900, Some("h-x")).await;

        let summary = db.sessions().report_summary(&session.id).await.unwrap();
        assert!(summary.is_open);
        assert_eq!(summary.total_income.cents(), 6_500);
        assert_eq!(summary.total_sales.cents(), 6_500);
        assert_eq!(summary.movement_count, 2);
        assert!(summary.end_amount.is_none());

        // Previewing writes nothing
        assert!(db.movements().list_by_session(&session.id).await.unwrap().is_empty());
        let closed = db.sessions().close(&session.id, &close_input(None)).await.unwrap();
        assert_eq!(closed.end_amount(), Some(Money::from_cents(6_500)));
    }

    #[tokio::test]
    async fn test_second_open_conflicts() {
        let (db, register_id) = setup(0).await;
        let first = db.sessions().open(&open_input(&register_id, Some(0))).await.unwrap();

        let second = db.sessions().open(&open_input(&register_id, Some(0))).await;
        assert!(matches!(second, Err(DbError::Conflict { .. })));

        let register = db.registers().get(&register_id).await.unwrap();
        assert_eq!(register.state_of(&pen()), RegisterState::Opened);
        let open = db.sessions().find_open(&register_id, &pen()).await.unwrap();
        assert_eq!(open.map(|s| s.id), Some(first.id));
    }

    #[tokio::test]
    async fn test_open_rejections() {
        let (db, register_id) = setup(0).await;

        let missing = db.sessions().open(&open_input("nope", Some(0))).await;
        assert!(matches!(missing, Err(DbError::NotFound { .. })));

        let negative = db.sessions().open(&open_input(&register_id, Some(-1))).await;
        assert!(matches!(negative, Err(DbError::Validation(_))));

        db.registers().deactivate(&register_id, "c-1").await.unwrap();
        let inactive = db.sessions().open(&open_input(&register_id, Some(0))).await;
        assert!(matches!(inactive, Err(DbError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_unaccepted_currency_is_rejected() {
        let db = Database::new(DbConfig::in_memory().accepted_currencies(vec![pen()]))
            .await
            .unwrap();
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

        let mut input = open_input(&register.id, Some(0));
        input.currency = Currency::new("USD").unwrap();
        let result = db.sessions().open(&input).await;
        assert!(matches!(result, Err(DbError::Validation(_))));
    }

    #[tokio::test]
    async fn test_double_close_conflicts_and_changes_nothing() {
        let (db, register_id) = setup(0).await;
        let session = db.sessions().open(&open_input(&register_id, Some(0))).await.unwrap();
        record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 1_000, None).await;
        db.sessions().close(&session.id, &close_input(None)).await.unwrap();

        let again = db.sessions().close(&session.id, &close_input(None)).await;
        assert!(matches!(again, Err(DbError::Conflict { .. })));

        let register = db.registers().get(&register_id).await.unwrap();
        assert_eq!(register.balance_of(&pen()).cents(), 1_000);
        assert_eq!(db.movements().list_by_session(&session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reported_amount_surfaces_variance() {
        let (db, register_id) = setup(10_000).await;
        let session = db.sessions().open(&open_input(&register_id, None)).await.unwrap();
        record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 5_000, None).await;
        record(&db, &register_id, TransactionKind::Cash, MovementType::Expense, 2_000, None).await;

        let closed = db
            .sessions()
            .close(&session.id, &close_input(Some(20_000)))
            .await
            .unwrap();
        assert_eq!(closed.end_amount(), Some(Money::from_cents(13_000)));
        assert_eq!(closed.variance(), Some(Money::from_cents(7_000)));

        let summary = db.sessions().report_summary(&session.id).await.unwrap();
        assert_eq!(summary.reported_end_amount, Some(Money::from_cents(20_000)));
        assert_eq!(summary.variance, Some(Money::from_cents(7_000)));
    }

    #[tokio::test]
    async fn test_close_folds_cash_and_bank_once() {
        let (db, register_id) = setup(0).await;
        let session = db.sessions().open(&open_input(&register_id, Some(0))).await.unwrap();
        let cash = record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 3_000, None).await;
        record(&db, &register_id, TransactionKind::Bank, MovementType::Income, 4_500, None).await;

        let pending = db.sessions().attach_pending_transactions(&session.id).await.unwrap();
        assert_eq!(pending.len(), 2);

        let closed = db.sessions().close(&session.id, &close_input(None)).await.unwrap();
        assert_eq!(closed.register_information.get("CASH"), Some(&Money::from_cents(3_000)));
        assert_eq!(closed.register_information.get("VISA"), Some(&Money::from_cents(4_500)));
        assert_eq!(closed.total_sales().cents(), 7_500);

        let summary = db.sessions().report_summary(&session.id).await.unwrap();
        assert_eq!(summary.cash_total.cents(), 3_000);
        assert_eq!(summary.bank_total.cents(), 4_500);

        let tagged = db
            .transactions()
            .get(&tesoro_core::movement::MovementSource::Cash(cash))
            .await
            .unwrap();
        assert_eq!(tagged.closing_session_id.as_deref(), Some(session.id.as_str()));

        // Next session starts from the closed balance with nothing pending
        let next = db.sessions().open(&open_input(&register_id, None)).await.unwrap();
        assert_eq!(next.start_amount.cents(), 7_500);
        let pending = db.sessions().attach_pending_transactions(&next.id).await.unwrap();
        assert!(pending.is_empty());
        let closed = db.sessions().close(&next.id, &close_input(None)).await.unwrap();
        assert_eq!(closed.end_amount(), Some(Money::from_cents(7_500)));
    }

    #[tokio::test]
    async fn test_attach_pending_on_closed_session_conflicts() {
        let (db, register_id) = setup(0).await;
        let session = db.sessions().open(&open_input(&register_id, Some(0))).await.unwrap();
        db.sessions().close(&session.id, &close_input(None)).await.unwrap();

        let result = db.sessions().attach_pending_transactions(&session.id).await;
        assert!(matches!(result, Err(DbError::Conflict { .. })));
    }

    fn offline(hash: &str, start: i64) -> OfflineSession {
        let opened_at = Utc::now() - Duration::hours(8);
        OfflineSession {
            hash_offline: hash.to_string(),
            terminal_id: Some("pos-9".to_string()),
            opened_by: "emp-1".to_string(),
            closed_by: "emp-1".to_string(),
            opened_at,
            closed_at: opened_at + Duration::hours(6),
            start_amount: Money::from_cents(start),
            reported_end_amount: None,
        }
    }

    #[tokio::test]
    async fn test_offline_replay_is_idempotent() {
        let (db, register_id) = setup(0).await;
        record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 2_500, Some("h-1")).await;
        record(&db, &register_id, TransactionKind::Bank, MovementType::Income, 500, Some("h-1")).await;
        // Live transactions are not touched by offline replay
        record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 9_900, None).await;

        let batch = vec![offline("h-1", 1_000)];
        let first = db.sessions().create_offline(&register_id, &pen(), &batch).await.unwrap();
        assert_eq!(first.created.len(), 1);
        let created = &first.created[0];
        assert_eq!(created.end_amount(), Some(Money::from_cents(4_000)));
        assert_eq!(created.hash_offline.as_deref(), Some("h-1"));

        let second = db.sessions().create_offline(&register_id, &pen(), &batch).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.replayed.len(), 1);
        assert_eq!(second.replayed[0].id, created.id);

        let register = db.registers().get(&register_id).await.unwrap();
        assert_eq!(register.balance_of(&pen()).cents(), 3_000);
        assert_eq!(register.state_of(&pen()), RegisterState::Closed);
        assert_eq!(db.movements().list_by_session(&created.id).await.unwrap().len(), 2);

        let summary = db.sessions().report_summary(&created.id).await.unwrap();
        assert_eq!(summary.end_amount, Some(Money::from_cents(4_000)));
    }

    #[tokio::test]
    async fn test_offline_divergent_payload_conflicts() {
        let (db, register_id) = setup(0).await;
        let original = offline("h-1", 1_000);
        db.sessions()
            .create_offline(&register_id, &pen(), &[original.clone()])
            .await
            .unwrap();

        let mut divergent = original;
        divergent.start_amount = Money::from_cents(2_000);
        let result = db
            .sessions()
            .create_offline(&register_id, &pen(), &[divergent])
            .await;
        assert!(matches!(result, Err(DbError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_offline_batch_rejects_duplicate_hashes() {
        let (db, register_id) = setup(0).await;
        let batch = vec![offline("h-1", 0), offline("h-1", 0)];
        let result = db.sessions().create_offline(&register_id, &pen(), &batch).await;
        assert!(matches!(result, Err(DbError::Validation(_))));
    }

    #[tokio::test]
    async fn test_void_closing_restores_pending_and_balance() {
        let (db, register_id) = setup(10_000).await;
        let session = db.sessions().open(&open_input(&register_id, None)).await.unwrap();
        record(&db, &register_id, TransactionKind::Cash, MovementType::Income, 5_000, None).await;
        record(&db, &register_id, TransactionKind::Cash, MovementType::Expense, 2_000, None).await;
        db.sessions().close(&session.id, &close_input(None)).await.unwrap();

        let voided = db.sessions().void_closing(&session.id).await.unwrap();
        assert!(voided.is_voided());

        let register = db.registers().get(&register_id).await.unwrap();
        assert_eq!(register.balance_of(&pen()).cents(), 10_000);
        assert!(db.movements().list_by_session(&session.id).await.unwrap().is_empty());
        assert!(db.sessions().list_by_register(&register_id, false).await.unwrap().is_empty());
        assert_eq!(db.sessions().list_by_register(&register_id, true).await.unwrap().len(), 1);

        let summary = db.sessions().report_summary(&session.id).await.unwrap();
        assert_eq!(summary.movement_count, 2);

        let again = db.sessions().void_closing(&session.id).await;
        assert!(matches!(again, Err(DbError::Conflict { .. })));

        // Released transactions fold into the next session
        let next = db.sessions().open(&open_input(&register_id, None)).await.unwrap();
        let closed = db.sessions().close(&next.id, &close_input(None)).await.unwrap();
        assert_eq!(closed.end_amount(), Some(Money::from_cents(13_000)));
    }
}
