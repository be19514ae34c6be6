// Database persistence tests against on-disk SQLite files

mod common;

use common::*;
use paper_exchange::db::TradeFillUpdate;
use paper_exchange::simulation::Fill;
use paper_exchange::{
    Database, Ledger, PortfolioStore, Side, SqliteLedger, TradeStatus, TradeStore, TradingError,
};

fn open(path: &std::path::Path) -> SqliteLedger {
    let db = Database::new(path).expect("Failed to open database");
    db.run_migrations().expect("Failed to run migrations");
    SqliteLedger::new(db)
}

#[test]
fn test_trades_and_portfolios_survive_reopen() {
    let (_temp_dir, db_path) = create_temp_db_dir();

    let trade_id = {
        let ledger = open(&db_path);
        paper_exchange::core::fund_account(&ledger, 1, d("2500.75")).unwrap();
        create_trade(&ledger, 1, Side::Ask, "64000.12345678", "0.015").id
    };

    // migrations are idempotent on an existing file
    let ledger = open(&db_path);
    let trade = ledger.get_by_id(trade_id).unwrap().expect("trade persisted");
    assert_eq!(trade.trade_type, Side::Ask);
    assert_eq!(trade.price, d("64000.12345678"));
    assert_eq!(trade.amount, d("0.015"));
    assert_eq!(trade.status, TradeStatus::Open);

    let portfolio = ledger.get_by_user_id(1).unwrap().expect("portfolio persisted");
    assert_eq!(portfolio.funds(), d("2500.75"));
}

#[test]
fn test_decimals_are_stored_as_exact_text() {
    let (_temp_dir, db_path) = create_temp_db_dir();
    let ledger = open(&db_path);
    let trade = create_trade(&ledger, 1, Side::Bid, "0.1", "0.2");

    let conn = ledger.database().get_connection();
    let conn = conn.lock().unwrap();
    let (price, kind): (String, String) = conn
        .query_row(
            "SELECT price, typeof(price) FROM trades WHERE id = ?1",
            [trade.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(price, "0.1");
    assert_eq!(kind, "text");
}

#[test]
fn test_fill_and_settle_commits_both_or_neither() {
    let (_temp_dir, db_path) = create_temp_db_dir();
    let ledger = open(&db_path);
    paper_exchange::core::fund_account(&ledger, 1, d("1000")).unwrap();
    let trade = create_trade(&ledger, 1, Side::Bid, "101", "2");

    let fill = Fill { side: Side::Bid, amount: d("2"), price: d("100") };
    let update = TradeFillUpdate { id: trade.id, filled_amount: d("2"), status: TradeStatus::Filled };

    let settled = ledger.fill_and_settle(&update, 1, &fill).unwrap();
    assert_eq!(settled.funds(), d("800"));
    assert_eq!(settled.coins(), d("2"));
    assert_eq!(ledger.get_by_id(trade.id).unwrap().unwrap().status, TradeStatus::Filled);

    // user 9 has no portfolio: the trade update must roll back too
    let orphan = create_trade(&ledger, 9, Side::Bid, "101", "1");
    let update = TradeFillUpdate { id: orphan.id, filled_amount: d("1"), status: TradeStatus::Filled };
    let result = ledger.fill_and_settle(&update, 9, &fill);
    assert!(matches!(result, Err(TradingError::PortfolioNotFound(9))));
    assert_eq!(ledger.get_by_id(orphan.id).unwrap().unwrap().status, TradeStatus::Open);
}

#[test]
fn test_bulk_lookup_skips_unknown_ids() {
    let ledger = create_test_ledger();
    let a = create_trade(&ledger, 1, Side::Bid, "100", "1");
    let b = create_trade(&ledger, 1, Side::Ask, "110", "1");

    let found = ledger.get_bulk_by_ids(&[b.id, 404, a.id, b.id]).unwrap();
    let ids: Vec<i64> = found.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
    assert!(ledger.get_bulk_by_ids(&[]).unwrap().is_empty());
}

#[test]
fn test_portfolio_update_requires_existing_row() {
    let ledger = create_test_ledger();
    let portfolio = paper_exchange::Portfolio::funded(5, d("10"));

    assert!(matches!(
        PortfolioStore::update(&ledger, 5, &portfolio),
        Err(TradingError::PortfolioNotFound(5))
    ));

    ledger.create_portfolio(&portfolio).unwrap();
    assert!(PortfolioStore::update(&ledger, 5, &portfolio).is_ok());
    assert!(ledger.create_portfolio(&portfolio).is_err());
}

#[test]
fn test_health_check() {
    let (_temp_dir, db_path) = create_temp_db_dir();
    let ledger = open(&db_path);
    assert!(ledger.database().health_check().unwrap());
}
