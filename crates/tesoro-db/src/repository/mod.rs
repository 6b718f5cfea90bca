//! # Repository Module
//!
//! SQLite repositories of the ledger.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  db.sessions().close(id, &input)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SessionRepository  (owns the transaction)                             │
//! │       │                                                                 │
//! │       ├── register::claim / apply_delta / set_state                    │
//! │       ├── transaction::list_pending_for_closing / tag_with_closing     │
//! │       └── movement::generate                                            │
//! │                                                                         │
//! │  ReconcilementRepository  (owns the transaction)                       │
//! │       ├── transaction::link_to_reconcilement / unlink                  │
//! │       └── bank_operation::link_to_reconcilement                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Free functions taking `&mut SqliteConnection` never begin or commit;
//! they run inside whichever transaction the calling repository opened.
//!
//! ## Available Repositories
//!
//! - [`RegisterRepository`](register::RegisterRepository) - registers, balances, state
//! - [`SessionRepository`](session::SessionRepository) - open, close, offline replay, summary
//! - [`MovementRepository`](movement::MovementRepository) - the movement trail
//! - [`TransactionRepository`](transaction::TransactionRepository) - payment transactions
//! - [`BankOperationRepository`](bank_operation::BankOperationRepository) - statement import
//! - [`ReconcilementRepository`](reconcilement::ReconcilementRepository) - reconcilements

pub mod bank_operation;
pub mod movement;
pub mod reconcilement;
pub mod register;
pub mod session;
pub mod transaction;
