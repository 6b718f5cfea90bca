//! Concurrent access tests on a file-backed database.
//!
//! In-memory databases use a single connection, so they cannot race. These
//! tests open a real file with several pooled connections and release all
//! tasks at once through a barrier.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tesoro_core::bank::{ImportBatch, NewBankOperation};
use tesoro_core::money::Money;
use tesoro_core::register::NewCashRegister;
use tesoro_core::session::{CloseSession, OpenSession};
use tesoro_core::types::{Currency, MovementType};
use tesoro_db::{Database, DbConfig, DbError, NewPaymentTransaction};
use tokio::sync::Barrier;

const TASKS: usize = 8;

/// The returned directory must outlive the database.
async fn setup() -> (TempDir, Database, String) {
    let dir = tempdir().expect("Failed to create temp directory");
    let config = DbConfig::new(dir.path().join("tesoro.db"))
        .max_connections(TASKS as u32)
        .busy_timeout(Duration::from_secs(30));
    let db = Database::new(config).await.unwrap();
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
    (dir, db, register.id)
}

fn pen() -> Currency {
    Currency::new("PEN").unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_open_admits_exactly_one() {
    let (_dir, db, register_id) = setup().await;
    let barrier = Arc::new(Barrier::new(TASKS));

    let mut handles = Vec::with_capacity(TASKS);
    for n in 0..TASKS {
        let db = db.clone();
        let barrier = barrier.clone();
        let register_id = register_id.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            db.sessions()
                .open(&OpenSession {
                    cash_register_id: register_id,
                    currency: pen(),
                    opened_by: format!("emp-{}", n),
                    terminal_id: None,
                    start_amount: Some(Money::zero()),
                })
                .await
        }));
    }

    let mut opened = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => opened += 1,
            Err(DbError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(opened, 1);
    assert_eq!(conflicts, TASKS - 1);

    let open_rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM closing_sessions WHERE cash_register_id = ?1 AND closed_at IS NULL",
    )
    .bind(&register_id)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(open_rows, 1);

    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_applies_once() {
    let (_dir, db, register_id) = setup().await;

    let session = db
        .sessions()
        .open(&OpenSession {
            cash_register_id: register_id.clone(),
            currency: pen(),
            opened_by: "emp-1".to_string(),
            terminal_id: None,
            start_amount: Some(Money::zero()),
        })
        .await
        .unwrap();
    db.transactions()
        .record_cash(&NewPaymentTransaction {
            company_id: "c-1".to_string(),
            cash_register_id: register_id.clone(),
            currency: Some(pen()),
            movement_type: Some(MovementType::Income),
            amount: Money::from_cents(2_500),
            ..Default::default()
        })
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(TASKS));
    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let db = db.clone();
        let barrier = barrier.clone();
        let session_id = session.id.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            db.sessions()
                .close(
                    &session_id,
                    &CloseSession {
                        closed_by: "emp-1".to_string(),
                        reported_end_amount: None,
                    },
                )
                .await
        }));
    }

    let mut closed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => closed += 1,
            Err(DbError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(closed, 1);

    let register = db.registers().get(&register_id).await.unwrap();
    assert_eq!(register.balance_of(&pen()).cents(), 2_500);
    assert_eq!(db.movements().list_by_session(&session.id).await.unwrap().len(), 1);

    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_balance_updates_do_not_drift() {
    let (_dir, db, register_id) = setup().await;
    let barrier = Arc::new(Barrier::new(TASKS));

    let mut handles = Vec::with_capacity(TASKS);
    for n in 0..TASKS {
        let db = db.clone();
        let barrier = barrier.clone();
        let register_id = register_id.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for _ in 0..10 {
                db.registers()
                    .update_balance(&register_id, &pen(), Money::from_cents(n as i64 + 1))
                    .await?;
            }
            Ok::<_, DbError>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let expected: i64 = (1..=TASKS as i64).sum::<i64>() * 10;
    let register = db.registers().get(&register_id).await.unwrap();
    assert_eq!(register.balance_of(&pen()).cents(), expected);

    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_imports_insert_a_line_once() {
    let (_dir, db, _) = setup().await;
    let barrier = Arc::new(Barrier::new(TASKS));

    let mut handles = Vec::with_capacity(TASKS);
    for n in 0..TASKS {
        let db = db.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            let batch = ImportBatch {
                company_id: "c-1".to_string(),
                bank_id: "bcp".to_string(),
                bank_account_id: "A1".to_string(),
                lines: vec![
                    NewBankOperation {
                        number_operation: "OP-1001".to_string(),
                        movement_type: MovementType::Income,
                        amount: Money::from_cents(50_000),
                        date_operation: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                        description: None,
                    },
                    NewBankOperation {
                        number_operation: format!("OP-2{:03}", n),
                        movement_type: MovementType::Expense,
                        amount: Money::from_cents(100),
                        date_operation: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
                        description: None,
                    },
                ],
            };
            barrier.wait().await;
            db.bank_operations().import_batch(&batch).await
        }));
    }

    let mut shared_inserted = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.inserted + outcome.skipped, 2);
        if !outcome.skipped_numbers.contains(&"OP-1001".to_string()) {
            shared_inserted += 1;
        }
    }
    assert_eq!(shared_inserted, 1);

    let stored: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bank_operations WHERE bank_account_id = 'A1' AND number_operation = 'OP-1001'",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(stored, 1);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bank_operations")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(total, 1 + TASKS as i64);

    db.close().await;
}
