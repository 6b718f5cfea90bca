//! # Demo Ledger Seeder
//!
//! Populates a database with one register and a closed session for
//! development.
//!
//! ## Usage
//! ```bash
//! # Use tesoro.toml / TESORO_DB_PATH, or the platform data directory
//! cargo run -p tesoro-db --bin seed
//!
//! # Specify database path
//! cargo run -p tesoro-db --bin seed -- --db ./data/tesoro.db
//!
//! # More transactions
//! cargo run -p tesoro-db --bin seed -- --count 200
//! ```

use std::env;
use std::path::PathBuf;
use tesoro_core::money::Money;
use tesoro_core::register::NewCashRegister;
use tesoro_core::session::{CloseSession, OpenSession};
use tesoro_core::types::{Currency, MovementType};
use tesoro_db::{Database, LedgerConfig, NewPaymentTransaction};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PAYMENT_METHODS: &[&str] = &["CASH", "VISA", "YAPE", "TRANSFER"];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tesoro=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut count: usize = 20;
    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tesoro Demo Ledger Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>      Transactions to record (default: 20)");
                println!("  -d, --db <PATH>      Database file path");
                println!("      --config <PATH>  tesoro.toml location");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => warn!(argument = other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = LedgerConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = Some(path);
    }
    let db_config = config.db_config()?;
    info!(path = %db_config.database_path.display(), "Seeding ledger");

    let db = Database::new(db_config).await?;
    let currency = match db.accepted_currencies().first() {
        Some(currency) => currency.clone(),
        None => Currency::new("PEN")?,
    };

    let register = db
        .registers()
        .create(&NewCashRegister {
            company_id: "demo-company".to_string(),
            subsidiary_id: "demo-subsidiary".to_string(),
            name: "Caja Principal".to_string(),
            opening_balance: [(currency.clone(), Money::from_cents(10_000))].into(),
            ..Default::default()
        })
        .await?;

    let session = db
        .sessions()
        .open(&OpenSession {
            cash_register_id: register.id.clone(),
            currency: currency.clone(),
            opened_by: "demo-cashier".to_string(),
            terminal_id: Some("pos-1".to_string()),
            start_amount: None,
        })
        .await?;

    for n in 0..count {
        let movement_type = if n % 5 == 4 {
            MovementType::Expense
        } else {
            MovementType::Income
        };
        let method = PAYMENT_METHODS[n % PAYMENT_METHODS.len()];
        let input = NewPaymentTransaction {
            company_id: register.company_id.clone(),
            cash_register_id: register.id.clone(),
            currency: Some(currency.clone()),
            movement_type: Some(movement_type),
            amount: Money::from_cents(500 + (n as i64 * 137) % 4_500),
            payment_method: method.to_string(),
            concept: Some(format!("Venta {:04}", n + 1)),
            bank_account_id: Some("demo-account".to_string()),
            ..Default::default()
        };
        if method == "CASH" || movement_type == MovementType::Expense {
            db.transactions().record_cash(&input).await?;
        } else {
            db.transactions().record_bank(&input).await?;
        }
    }

    let closed = db
        .sessions()
        .close(
            &session.id,
            &CloseSession {
                closed_by: "demo-cashier".to_string(),
                reported_end_amount: None,
            },
        )
        .await?;

    let summary = db.sessions().report_summary(&closed.id).await?;
    println!();
    println!("Session {} ({})", summary.session_id, summary.currency);
    println!("  start    {}", summary.start_amount);
    println!("  income   {}", summary.total_income);
    println!("  expense  {}", summary.total_expense);
    println!("  end      {}", summary.end_amount.unwrap_or_default());
    for line in &summary.by_payment_method {
        println!("  {:<9}{} ({} movements)", line.payment_method, line.net(), line.count);
    }

    db.close().await;
    Ok(())
}
