//! # Cash Register
//!
//! A till or vault. Owns one balance and one open/closed flag per currency.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  CashRegister "Caja 1"                       │
//! │                                              │
//! │  balance: { "PEN": 130.00, "USD": 20.00 }    │
//! │  state:   { "PEN": opened, "USD": closed }   │
//! │                                              │
//! │  flag_control  strict balance checks         │
//! │  flag_general  shared / house register       │
//! │  flag_active   soft delete                   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The balance of a currency only moves when a closing session settles,
//! when a closing is rolled back, or through an explicit reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Currency, RegisterState};

/// Per-currency balances.
pub type BalanceMap = BTreeMap<Currency, Money>;

/// Per-currency open/closed flags.
pub type StateMap = BTreeMap<Currency, RegisterState>;

/// A cash register as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashRegister {
    pub id: String,
    pub company_id: String,
    pub subsidiary_id: String,
    pub warehouse_id: Option<String>,
    pub terminal_id: Option<String>,
    pub name: String,
    #[ts(as = "BTreeMap<String, Money>")]
    pub balance: BalanceMap,
    #[ts(as = "BTreeMap<String, RegisterState>")]
    pub state: StateMap,
    /// Enforces strict balance checks (no negative settlement).
    pub flag_control: bool,
    /// Shared/house register.
    pub flag_general: bool,
    pub flag_active: bool,
    /// Bumped by every write that claims the register row.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl CashRegister {
    /// Balance of one currency; absent keys read as zero.
    pub fn balance_of(&self, currency: &Currency) -> Money {
        self.balance.get(currency).copied().unwrap_or_default()
    }

    /// State of one currency; absent keys read as closed.
    pub fn state_of(&self, currency: &Currency) -> RegisterState {
        self.state.get(currency).copied().unwrap_or_default()
    }

    /// Checks the register accepts a new session.
    ///
    /// Inactive registers refuse new sessions. Sessions already open on an
    /// inactive register can still be closed, so close paths do not call this.
    pub fn ensure_can_open(&self) -> CoreResult<()> {
        if !self.flag_active {
            return Err(CoreError::rejected(
                "CashRegister",
                &self.id,
                "register is inactive",
            ));
        }
        Ok(())
    }

    /// Checks that applying `delta` keeps a controlled register non-negative.
    pub fn ensure_can_settle(&self, currency: &Currency, delta: Money) -> CoreResult<()> {
        if !self.flag_control {
            return Ok(());
        }
        let after = self.balance_of(currency) + delta;
        if after.is_negative() {
            return Err(CoreError::rejected(
                "CashRegister",
                &self.id,
                format!(
                    "controlled register would end with negative {} balance ({})",
                    currency, after
                ),
            ));
        }
        Ok(())
    }
}

/// Provisioning input for a new register.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCashRegister {
    pub company_id: String,
    pub subsidiary_id: String,
    pub warehouse_id: Option<String>,
    pub terminal_id: Option<String>,
    pub name: String,
    pub flag_control: bool,
    pub flag_general: bool,
    #[serde(default)]
    pub opening_balance: BalanceMap,
}

// =============================================================================
// Unit Tests
// =============================================================================
