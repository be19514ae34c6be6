//! Storage traits consumed by the matching engine, and their SQLite implementation

use std::collections::HashSet;

use tracing::debug;

use super::portfolio::Portfolio;
use super::trade::{NewTrade, Trade, TradeFillUpdate, TradeStatus};
use super::Database;
use crate::error::{TradingError, TradingResult};
use crate::simulation::settlement::{settle, Fill};

/// Persisted trades
pub trait TradeStore {
    fn create(&self, trade: &NewTrade) -> TradingResult<Trade>;

    fn get_by_id(&self, id: i64) -> TradingResult<Option<Trade>>;

    /// Trades for the given ids; ids with no row are left out
    fn get_bulk_by_ids(&self, ids: &[i64]) -> TradingResult<Vec<Trade>>;

    /// Write all updates or none
    fn update_bulk(&self, updates: &[TradeFillUpdate]) -> TradingResult<()>;

    /// Mark a trade cancelled. Fails for unknown or already terminal trades.
    fn cancel(&self, id: i64) -> TradingResult<Trade>;

    fn list_by_user(&self, user_id: i64) -> TradingResult<Vec<Trade>>;
}

/// Persisted portfolios
pub trait PortfolioStore {
    fn get_by_user_id(&self, user_id: i64) -> TradingResult<Option<Portfolio>>;

    fn update(&self, user_id: i64, portfolio: &Portfolio) -> TradingResult<()>;

    fn create_portfolio(&self, portfolio: &Portfolio) -> TradingResult<()>;
}

/// Storage that can apply a trade fill and its settlement as one unit
pub trait Ledger: TradeStore + PortfolioStore {
    /// Persist `update` and settle `fill` against `user_id` atomically.
    /// Returns the settled portfolio; on error nothing is written.
    fn fill_and_settle(
        &self,
        update: &TradeFillUpdate,
        user_id: i64,
        fill: &Fill,
    ) -> TradingResult<Portfolio>;
}

/// Ledger backed by the SQLite database
#[derive(Clone)]
pub struct SqliteLedger {
    db: Database,
}

impl SqliteLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl TradeStore for SqliteLedger {
    fn create(&self, trade: &NewTrade) -> TradingResult<Trade> {
        self.db.unit_of_work(|tx| {
            let id = Trade::insert(tx, trade)?;
            Trade::find_by_id(tx, id)?.ok_or(TradingError::TradeNotFound(id))
        })
    }

    fn get_by_id(&self, id: i64) -> TradingResult<Option<Trade>> {
        self.db.with_connection(|conn| Ok(Trade::find_by_id(conn, id)?))
    }

    fn get_bulk_by_ids(&self, ids: &[i64]) -> TradingResult<Vec<Trade>> {
        let unique: Vec<i64> = {
            let mut seen = HashSet::new();
            ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        };
        self.db.with_connection(|conn| Ok(Trade::find_by_ids(conn, &unique)?))
    }

    fn update_bulk(&self, updates: &[TradeFillUpdate]) -> TradingResult<()> {
        self.db.unit_of_work(|tx| {
            for update in updates {
                if Trade::apply_fill(tx, update)? == 0 {
                    return Err(TradingError::TradeNotFound(update.id));
                }
            }
            debug!("Persisted {} trade updates", updates.len());
            Ok(())
        })
    }

    fn cancel(&self, id: i64) -> TradingResult<Trade> {
        self.db.unit_of_work(|tx| {
            let trade = Trade::find_by_id(tx, id)?.ok_or(TradingError::TradeNotFound(id))?;
            if trade.status.is_terminal() {
                return Err(TradingError::TradeClosed(id, trade.status.to_string().to_string()));
            }
            Trade::update_status(tx, id, TradeStatus::Cancelled)?;
            Trade::find_by_id(tx, id)?.ok_or(TradingError::TradeNotFound(id))
        })
    }

    fn list_by_user(&self, user_id: i64) -> TradingResult<Vec<Trade>> {
        self.db.with_connection(|conn| Ok(Trade::list_by_user(conn, user_id)?))
    }
}

impl PortfolioStore for SqliteLedger {
    fn get_by_user_id(&self, user_id: i64) -> TradingResult<Option<Portfolio>> {
        self.db.with_connection(|conn| Ok(Portfolio::find_by_user(conn, user_id)?))
    }

    fn update(&self, user_id: i64, portfolio: &Portfolio) -> TradingResult<()> {
        self.db.with_connection(|conn| {
            if portfolio.update(conn, user_id)? == 0 {
                return Err(TradingError::PortfolioNotFound(user_id));
            }
            Ok(())
        })
    }

    fn create_portfolio(&self, portfolio: &Portfolio) -> TradingResult<()> {
        self.db.with_connection(|conn| Ok(portfolio.insert(conn)?))
    }
}

impl Ledger for SqliteLedger {
    fn fill_and_settle(
        &self,
        update: &TradeFillUpdate,
        user_id: i64,
        fill: &Fill,
    ) -> TradingResult<Portfolio> {
        self.db.unit_of_work(|tx| {
            if Trade::apply_fill_if_active(tx, update)? == 0 {
                // Gone, or closed by someone else since it was read
                return Err(match Trade::find_by_id(tx, update.id)? {
                    Some(trade) => TradingError::TradeClosed(update.id, trade.status.to_string().to_string()),
                    None => TradingError::TradeNotFound(update.id),
                });
            }

            let current = Portfolio::find_by_user(tx, user_id)?
                .ok_or(TradingError::PortfolioNotFound(user_id))?;
            let settled = settle(&current, fill);
            settled.update(tx, user_id)?;

            Ok(settled)
        })
    }
}
