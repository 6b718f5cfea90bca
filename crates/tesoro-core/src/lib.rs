//! # tesoro-core: Ledger Rules for Cash Registers and Bank Reconciliation
//!
//! Pure domain logic of the treasury engine. Nothing in this crate touches
//! the database; `tesoro-db` loads and stores the types defined here and
//! calls into these rules inside its transactions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tesoro Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Callers (route handlers, cron jobs, reports)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tesoro-db (repositories)                     │   │
//! │  │       transactions, locking, SQLite, migrations, config         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tesoro-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │  register   session   movement   bank   reconcilement  summary │   │
//! │  │  money      types     validation error                          │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`register`] - Cash registers with per-currency balance and state maps
//! - [`session`] - Closing session state machine and offline payloads
//! - [`movement`] - Movement trail derivation (fold-in with dedup)
//! - [`bank`] - Bank statement lines and import outcomes
//! - [`reconcilement`] - Reconcilement records and link planning
//! - [`summary`] - Session summary with the conservation check
//! - [`money`] - Integer money
//! - [`types`] - Currency codes and small enums
//! - [`error`] / [`validation`] - Error taxonomy and input checks
//!
//! ## Example Usage
//!
//! ```rust
//! use tesoro_core::money::Money;
//! use tesoro_core::reconcilement::LinkPlan;
//!
//! let start = Money::from_cents(10_000);
//! let end = start + Money::from_cents(5_000) - Money::from_cents(2_000);
//! assert_eq!(end.to_string(), "130.00");
//!
//! let listed = vec!["T1".to_string(), "T2".to_string()];
//! let plan = LinkPlan::between(&listed, &listed[..1]);
//! assert_eq!(plan.unlink, vec!["T2".to_string()]);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bank;
pub mod error;
pub mod money;
pub mod movement;
pub mod reconcilement;
pub mod register;
pub mod session;
pub mod summary;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Payment method code used when a source transaction carries none.
pub const DEFAULT_PAYMENT_METHOD: &str = "CASH";

/// Maximum statement lines accepted in one import batch.
pub const MAX_IMPORT_LINES: usize = 5_000;

/// Maximum sessions accepted in one offline batch.
///
/// A terminal reports at most a few days of closings after reconnecting.
pub const MAX_OFFLINE_SESSIONS: usize = 200;
