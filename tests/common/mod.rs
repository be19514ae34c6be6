// Common test utilities and helpers
#![allow(dead_code)]

use std::path::PathBuf;
use std::str::FromStr;

use paper_exchange::core::fund_account;
use paper_exchange::db::NewTrade;
use paper_exchange::simulation::{DepthEvent, DepthSnapshot};
use paper_exchange::{
    BookView, Config, Database, PersistFailurePolicy, PriceLevel, Side, SqliteLedger, Trade, TradeStore,
};
use rust_decimal::Decimal;
use tempfile::TempDir;

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal literal")
}

/// Levels from `(price, quantity)` string pairs
pub fn levels(rows: &[(&str, &str)]) -> Vec<PriceLevel> {
    rows.iter().map(|(p, q)| PriceLevel::new(d(p), d(q))).collect()
}

pub fn book(last_update_id: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> BookView {
    BookView {
        last_update_id,
        bids: levels(bids),
        asks: levels(asks),
    }
}

pub fn snapshot(last_update_id: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthSnapshot {
    DepthSnapshot {
        last_update_id,
        bids: levels(bids),
        asks: levels(asks),
    }
}

pub fn event(first: u64, last: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthEvent {
    DepthEvent {
        first_update_id: first,
        final_update_id: last,
        bids: levels(bids),
        asks: levels(asks),
    }
}

/// Migrated in-memory ledger
pub fn create_test_ledger() -> SqliteLedger {
    let db = Database::new_in_memory().expect("Failed to create in-memory database");
    db.run_migrations().expect("Failed to run migrations");
    SqliteLedger::new(db)
}

/// Ledger with `user_id` funded with `funds`
pub fn funded_ledger(user_id: i64, funds: &str) -> SqliteLedger {
    let ledger = create_test_ledger();
    fund_account(&ledger, user_id, d(funds)).expect("Failed to fund account");
    ledger
}

pub fn create_trade(ledger: &SqliteLedger, user_id: i64, side: Side, price: &str, amount: &str) -> Trade {
    ledger
        .create(&NewTrade {
            user_id,
            trade_type: side,
            price: d(price),
            amount: d(amount),
        })
        .expect("Failed to create trade")
}

/// Create a test configuration with short intervals
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.matching.cycle_interval_ms = 10;
    config.matching.history_interval_ms = 10;
    config.matching.on_persist_failure = PersistFailurePolicy::Revert;
    config
}

/// Create a temporary directory for test databases
pub fn create_temp_db_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");
    (temp_dir, db_path)
}
