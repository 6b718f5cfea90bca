//! # tesoro-db: Persistence Layer for Tesoro
//!
//! SQLite storage for registers, closing sessions, the movement trail,
//! bank statement lines and reconcilements, using sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tesoro Data Flow                               │
//! │                                                                         │
//! │  Caller (API handler, sync worker, seed binary)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    tesoro-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ RegisterRepo   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SessionRepo    │    │ 001_initial  │  │   │
//! │  │   │ busy_timeout  │    │ Reconcilement  │    │ _schema.sql  │  │   │
//! │  │   │ LedgerConfig  │    │ BankOperation  │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                              │                                  │   │
//! │  │                              ▼                                  │   │
//! │  │                   tesoro-core (rules, no I/O)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - `LedgerConfig` (TOML file + `TESORO_*` environment)
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tesoro_db::{Database, LedgerConfig};
//!
//! let config = LedgerConfig::load(None)?;
//! let db = Database::new(config.db_config()?).await?;
//!
//! let session = db.sessions().open(&open).await?;
//! let closed = db.sessions().close(&session.id, &close).await?;
//! let summary = db.sessions().report_summary(&closed.id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::LedgerConfig;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::bank_operation::BankOperationRepository;
pub use repository::movement::MovementRepository;
pub use repository::reconcilement::ReconcilementRepository;
pub use repository::register::RegisterRepository;
pub use repository::session::{OfflineOutcome, SessionRepository};
pub use repository::transaction::{NewPaymentTransaction, ReconciliationFlag, TransactionRepository};
