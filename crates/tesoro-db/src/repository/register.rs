//! # Register Repository
//!
//! Cash registers and their per-currency balance and state maps.
//!
//! ## Balance Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN (deferred)                                                       │
//! │    claim()        UPDATE cash_registers SET version = version + 1       │
//! │                   ── first statement is a write: takes the write lock   │
//! │                      now, other writers wait on busy_timeout            │
//! │    fetch()        read the row under the lock                           │
//! │    apply_delta()  UPDATE ... SET balance = json_set(balance, '$.PEN',   │
//! │                       COALESCE(json_extract(balance, '$.PEN'), 0) + d)  │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The helpers taking `&mut SqliteConnection` run inside the caller's
//! transaction; the session repository uses them during open and close.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tesoro_core::money::Money;
use tesoro_core::register::{BalanceMap, CashRegister, NewCashRegister, StateMap};
use tesoro_core::types::{new_id, Currency, RegisterState};
use tesoro_core::validation::{validate_non_negative, validate_required};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

const SELECT_REGISTER: &str = r#"
    SELECT id, company_id, subsidiary_id, warehouse_id, terminal_id, name,
           balance, state, flag_control, flag_general, flag_active, version,
           created_at, updated_at
    FROM cash_registers
"#;

#[derive(Debug, sqlx::FromRow)]
struct RegisterRow {
    id: String,
    company_id: String,
    subsidiary_id: String,
    warehouse_id: Option<String>,
    terminal_id: Option<String>,
    name: String,
    balance: String,
    state: String,
    flag_control: bool,
    flag_general: bool,
    flag_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RegisterRow> for CashRegister {
    type Error = DbError;

    fn try_from(row: RegisterRow) -> DbResult<Self> {
        Ok(CashRegister {
            balance: serde_json::from_str(&row.balance)?,
            state: serde_json::from_str(&row.state)?,
            id: row.id,
            company_id: row.company_id,
            subsidiary_id: row.subsidiary_id,
            warehouse_id: row.warehouse_id,
            terminal_id: row.terminal_id,
            name: row.name,
            flag_control: row.flag_control,
            flag_general: row.flag_general,
            flag_active: row.flag_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// JSON path addressing one currency key.
fn currency_path(currency: &Currency) -> String {
    format!("$.{}", currency)
}

// =============================================================================
// Transaction-scoped helpers
// =============================================================================

/// Takes the write lock on the register row by bumping its version.
pub(crate) async fn claim(conn: &mut SqliteConnection, register_id: &str) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE cash_registers SET version = version + 1, updated_at = ?2 WHERE id = ?1",
    )
    .bind(register_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("CashRegister", register_id));
    }
    Ok(())
}

pub(crate) async fn fetch(
    conn: &mut SqliteConnection,
    register_id: &str,
) -> DbResult<Option<CashRegister>> {
    let row: Option<RegisterRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_REGISTER))
        .bind(register_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(CashRegister::try_from).transpose()
}

pub(crate) async fn fetch_required(
    conn: &mut SqliteConnection,
    register_id: &str,
) -> DbResult<CashRegister> {
    fetch(conn, register_id)
        .await?
        .ok_or_else(|| DbError::not_found("CashRegister", register_id))
}

/// Adds a signed delta to one currency, creating the key when absent.
pub(crate) async fn apply_delta(
    conn: &mut SqliteConnection,
    register_id: &str,
    currency: &Currency,
    delta: Money,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE cash_registers
        SET balance = json_set(balance, ?2, COALESCE(json_extract(balance, ?2), 0) + ?3),
            updated_at = ?4
        WHERE id = ?1
        "#,
    )
    .bind(register_id)
    .bind(currency_path(currency))
    .bind(delta.cents())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    debug!(register_id, %currency, delta = delta.cents(), "Register balance adjusted");
    Ok(())
}

pub(crate) async fn set_balance(
    conn: &mut SqliteConnection,
    register_id: &str,
    currency: &Currency,
    amount: Money,
) -> DbResult<()> {
    sqlx::query(
        "UPDATE cash_registers SET balance = json_set(balance, ?2, ?3), updated_at = ?4 WHERE id = ?1",
    )
    .bind(register_id)
    .bind(currency_path(currency))
    .bind(amount.cents())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn set_state(
    conn: &mut SqliteConnection,
    register_id: &str,
    currency: &Currency,
    state: RegisterState,
) -> DbResult<()> {
    let value = match state {
        RegisterState::Opened => "opened",
        RegisterState::Closed => "closed",
    };
    sqlx::query(
        "UPDATE cash_registers SET state = json_set(state, ?2, ?3), updated_at = ?4 WHERE id = ?1",
    )
    .bind(register_id)
    .bind(currency_path(currency))
    .bind(value)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    debug!(register_id, %currency, state = value, "Register state changed");
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for cash register operations.
#[derive(Debug, Clone)]
pub struct RegisterRepository {
    pool: SqlitePool,
}

impl RegisterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RegisterRepository { pool }
    }

    /// Provisions a register. Every opening balance currency starts closed.
    pub async fn create(&self, input: &NewCashRegister) -> DbResult<CashRegister> {
        validate_required("company_id", &input.company_id)?;
        validate_required("subsidiary_id", &input.subsidiary_id)?;
        validate_required("name", &input.name)?;
        for amount in input.opening_balance.values() {
            validate_non_negative("opening_balance", *amount)?;
        }

        let now = Utc::now();
        let state: StateMap = input
            .opening_balance
            .keys()
            .map(|currency| (currency.clone(), RegisterState::Closed))
            .collect();

        let register = CashRegister {
            id: new_id(),
            company_id: input.company_id.clone(),
            subsidiary_id: input.subsidiary_id.clone(),
            warehouse_id: input.warehouse_id.clone(),
            terminal_id: input.terminal_id.clone(),
            name: input.name.trim().to_string(),
            balance: input.opening_balance.clone(),
            state,
            flag_control: input.flag_control,
            flag_general: input.flag_general,
            flag_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO cash_registers (
                id, company_id, subsidiary_id, warehouse_id, terminal_id, name,
                balance, state, flag_control, flag_general, flag_active, version,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&register.id)
        .bind(&register.company_id)
        .bind(&register.subsidiary_id)
        .bind(&register.warehouse_id)
        .bind(&register.terminal_id)
        .bind(&register.name)
        .bind(serde_json::to_string(&register.balance)?)
        .bind(serde_json::to_string(&register.state)?)
        .bind(register.flag_control)
        .bind(register.flag_general)
        .bind(register.flag_active)
        .bind(register.version)
        .bind(register.created_at)
        .bind(register.updated_at)
        .execute(&self.pool)
        .await?;

        info!(register_id = %register.id, company_id = %register.company_id, "Cash register created");
        Ok(register)
    }

    pub async fn get(&self, id: &str) -> DbResult<CashRegister> {
        let mut conn = self.pool.acquire().await?;
        fetch_required(&mut conn, id).await
    }

    /// Gets a register, treating another company's register as missing.
    pub async fn get_for_company(&self, id: &str, company_id: &str) -> DbResult<CashRegister> {
        let register = self.get(id).await?;
        if register.company_id != company_id {
            return Err(DbError::not_found("CashRegister", id));
        }
        Ok(register)
    }

    pub async fn list_by_company(
        &self,
        company_id: &str,
        include_inactive: bool,
    ) -> DbResult<Vec<CashRegister>> {
        let rows: Vec<RegisterRow> = sqlx::query_as(&format!(
            "{} WHERE company_id = ?1 AND (flag_active = 1 OR ?2) ORDER BY name, id",
            SELECT_REGISTER
        ))
        .bind(company_id)
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CashRegister::try_from).collect()
    }

    /// Soft-deletes a register. Open sessions on it can still be closed.
    pub async fn deactivate(&self, id: &str, company_id: &str) -> DbResult<CashRegister> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE cash_registers
            SET flag_active = 0, version = version + 1, updated_at = ?3
            WHERE id = ?1 AND company_id = ?2
            "#,
        )
        .bind(id)
        .bind(company_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CashRegister", id));
        }
        let register = fetch_required(&mut tx, id).await?;
        tx.commit().await?;

        info!(register_id = id, "Cash register deactivated");
        Ok(register)
    }

    /// Adds a signed delta to `balance[currency]` atomically.
    ///
    /// ## Errors
    /// - `NotFound` for an unknown register
    /// - `Rejected` when a controlled register would go negative
    pub async fn update_balance(
        &self,
        id: &str,
        currency: &Currency,
        delta: Money,
    ) -> DbResult<CashRegister> {
        let mut tx = self.pool.begin().await?;
        claim(&mut tx, id).await?;
        let register = fetch_required(&mut tx, id).await?;
        register.ensure_can_settle(currency, delta)?;
        apply_delta(&mut tx, id, currency, delta).await?;
        let register = fetch_required(&mut tx, id).await?;
        tx.commit().await?;

        info!(register_id = id, %currency, delta = delta.cents(), "Register balance updated");
        Ok(register)
    }

    /// Administrative override of one currency's balance.
    pub async fn reset_balance(
        &self,
        id: &str,
        currency: &Currency,
        new_amount: Money,
    ) -> DbResult<CashRegister> {
        validate_non_negative("new_amount", new_amount)?;

        let mut tx = self.pool.begin().await?;
        claim(&mut tx, id).await?;
        let before = fetch_required(&mut tx, id).await?.balance_of(currency);
        set_balance(&mut tx, id, currency, new_amount).await?;
        let register = fetch_required(&mut tx, id).await?;
        tx.commit().await?;

        info!(
            register_id = id,
            %currency,
            before = before.cents(),
            after = new_amount.cents(),
            "Register balance reset"
        );
        Ok(register)
    }

    /// Flips the per-currency state flag. Session open and close call the
    /// transaction-scoped variant; this entry point is for repair tooling.
    pub async fn mark_state(
        &self,
        id: &str,
        currency: &Currency,
        state: RegisterState,
    ) -> DbResult<CashRegister> {
        let mut tx = self.pool.begin().await?;
        claim(&mut tx, id).await?;
        set_state(&mut tx, id, currency, state).await?;
        let register = fetch_required(&mut tx, id).await?;
        tx.commit().await?;
        Ok(register)
    }

    /// Raw balance map, for reporting.
    pub async fn balances(&self, id: &str) -> DbResult<BalanceMap> {
        Ok(self.get(id).await?.balance)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn pen() -> Currency {
        Currency::new("PEN").unwrap()
    }

    fn new_register(flag_control: bool) -> NewCashRegister {
        NewCashRegister {
            company_id: "c-1".to_string(),
            subsidiary_id: "sub-1".to_string(),
            name: "Caja 1".to_string(),
            flag_control,
            opening_balance: BalanceMap::from([(pen(), Money::from_cents(10_000))]),
            ..Default::default()
        }
    }

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = setup().await;
        let created = db.registers().create(&new_register(false)).await.unwrap();

        let loaded = db.registers().get(&created.id).await.unwrap();
        assert_eq!(loaded.balance_of(&pen()).cents(), 10_000);
        assert_eq!(loaded.state_of(&pen()), RegisterState::Closed);
        assert!(loaded.flag_active);

        let other = db.registers().get_for_company(&created.id, "c-2").await;
        assert!(matches!(other, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_balance_creates_missing_currency() {
        let db = setup().await;
        let r = db.registers().create(&new_register(false)).await.unwrap();
        let usd = Currency::new("USD").unwrap();

        let updated = db
            .registers()
            .update_balance(&r.id, &usd, Money::from_cents(2_500))
            .await
            .unwrap();
        assert_eq!(updated.balance_of(&usd).cents(), 2_500);
        assert_eq!(updated.balance_of(&pen()).cents(), 10_000);

        let updated = db
            .registers()
            .update_balance(&r.id, &pen(), Money::from_cents(-3_000))
            .await
            .unwrap();
        assert_eq!(updated.balance_of(&pen()).cents(), 7_000);
        assert!(updated.version > r.version);
    }

    #[tokio::test]
    async fn test_controlled_register_rejects_overdraft() {
        let db = setup().await;
        let r = db.registers().create(&new_register(true)).await.unwrap();

        let result = db
            .registers()
            .update_balance(&r.id, &pen(), Money::from_cents(-10_001))
            .await;
        assert!(matches!(result, Err(DbError::Rejected { .. })));

        // Rolled back: nothing changed
        assert_eq!(db.registers().get(&r.id).await.unwrap().balance_of(&pen()).cents(), 10_000);
    }

    #[tokio::test]
    async fn test_reset_and_unknown_register() {
        let db = setup().await;
        let r = db.registers().create(&new_register(false)).await.unwrap();

        let reset = db
            .registers()
            .reset_balance(&r.id, &pen(), Money::from_cents(500))
            .await
            .unwrap();
        assert_eq!(reset.balance_of(&pen()).cents(), 500);

        let missing = db
            .registers()
            .update_balance("nope", &pen(), Money::from_cents(1))
            .await;
        assert!(matches!(missing, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_deactivate_hides_from_active_listing() {
        let db = setup().await;
        let r = db.registers().create(&new_register(false)).await.unwrap();
        db.registers().create(&new_register(false)).await.unwrap();

        db.registers().deactivate(&r.id, "c-1").await.unwrap();

        assert_eq!(db.registers().list_by_company("c-1", false).await.unwrap().len(), 1);
        assert_eq!(db.registers().list_by_company("c-1", true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_state() {
        let db = setup().await;
        let r = db.registers().create(&new_register(false)).await.unwrap();
        let updated = db
            .registers()
            .mark_state(&r.id, &pen(), RegisterState::Opened)
            .await
            .unwrap();
        assert_eq!(updated.state_of(&pen()), RegisterState::Opened);
    }
}
