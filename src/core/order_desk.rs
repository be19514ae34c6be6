// Order Desk
// Session-scoped controller: owns the user's virtual orders and talks to the ledger.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::PersistFailurePolicy;
use crate::core::session::Session;
use crate::db::{Ledger, NewTrade, Portfolio, Trade};
use crate::error::{TradingError, TradingResult};
use crate::simulation::matching_engine::{CycleOutcome, MatchingEngine};
use crate::simulation::merger::{merge_book, MergedBook};
use crate::simulation::order_book::BookView;
use crate::simulation::virtual_orders::{AckOutcome, VirtualOrderSet};
use crate::types::{parse_positive_decimal, Side};

pub struct OrderDesk<L: Ledger> {
    ledger: L,
    session: Session,
    orders: VirtualOrderSet,
    history: Vec<Trade>,
}

impl<L: Ledger> OrderDesk<L> {
    pub fn new(ledger: L, on_persist_failure: PersistFailurePolicy) -> Self {
        Self {
            ledger,
            session: Session::new(),
            orders: VirtualOrderSet::new(on_persist_failure),
            history: Vec::new(),
        }
    }

    /// Open a session for `user_id` and load their resting orders
    pub fn open(&mut self, user_id: i64) -> TradingResult<()> {
        self.session.open(user_id);
        let loaded = self.orders.reload(&self.ledger, user_id)?;
        self.refresh_history()?;
        info!("📋 Loaded {} resting orders for user {}", loaded, user_id);
        Ok(())
    }

    pub fn close(&mut self) {
        self.session.close();
        self.orders.clear();
        self.history.clear();
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn orders(&self) -> &VirtualOrderSet {
        &self.orders
    }

    /// Most recent order history, newest first
    pub fn history(&self) -> &[Trade] {
        &self.history
    }

    /// Place an order from raw user input; bad input is rejected before anything changes
    pub fn place_order(&mut self, side: &str, price: &str, amount: &str) -> TradingResult<Trade> {
        let side: Side = side.parse()?;
        let price = parse_positive_decimal("price", price)?;
        let amount = parse_positive_decimal("amount", amount)?;
        self.place(side, price, amount)
    }

    pub fn place(&mut self, side: Side, price: Decimal, amount: Decimal) -> TradingResult<Trade> {
        let user_id = self.session.require_user()?;
        if price <= Decimal::ZERO || amount <= Decimal::ZERO {
            return Err(TradingError::InvalidParameter(
                "order".to_string(),
                "price and amount must be positive".to_string(),
            ));
        }

        let command = self.orders.add(side, price, amount);
        let persisted = self.ledger.create(&NewTrade {
            user_id,
            trade_type: side,
            price,
            amount,
        });

        match self.orders.acknowledge(command.id, persisted.as_ref()) {
            AckOutcome::Bound(trade_id) => {
                info!("📝 Placed {} {} @ {} as trade {}", side, amount, price, trade_id);
            }
            outcome => debug!("Order command {} acknowledged: {:?}", command.id, outcome),
        }

        persisted
    }

    /// Cancel one of the session user's trades
    pub fn cancel_order(&mut self, trade_id: i64) -> TradingResult<Trade> {
        let user_id = self.session.require_user()?;

        match self.ledger.get_by_id(trade_id)? {
            Some(trade) if trade.user_id == user_id => {}
            _ => return Err(TradingError::TradeNotFound(trade_id)),
        }

        let cancelled = self.ledger.cancel(trade_id)?;
        info!("🚫 Cancelled trade {}", trade_id);

        self.orders.reload(&self.ledger, user_id)?;
        Ok(cancelled)
    }

    /// Re-read the user's trades for the order history view
    pub fn refresh_history(&mut self) -> TradingResult<usize> {
        let user_id = self.session.require_user()?;
        self.history = self.ledger.list_by_user(user_id)?;
        Ok(self.history.len())
    }

    /// Re-read the user's trades and rebuild both the history and the resting orders,
    /// picking up orders placed or cancelled by other processes
    pub fn refresh(&mut self) -> TradingResult<usize> {
        let user_id = self.session.require_user()?;
        let trades = self.ledger.list_by_user(user_id)?;

        let before = self.orders.len();
        self.orders.load_from_trades(&trades);
        if self.orders.len() != before {
            debug!("Resting orders for user {}: {} -> {}", user_id, before, self.orders.len());
        }

        self.history = trades;
        Ok(self.orders.len())
    }

    pub fn portfolio(&self) -> TradingResult<Portfolio> {
        let user_id = self.session.require_user()?;
        self.ledger
            .get_by_user_id(user_id)?
            .ok_or(TradingError::PortfolioNotFound(user_id))
    }

    /// Real book merged with the user's virtual orders
    pub fn merged_book(&self, book: &BookView, depth: usize) -> MergedBook {
        merge_book(book, &self.orders.snapshot(), depth)
    }

    /// Run one matching cycle on behalf of the session user
    pub fn run_matching(&mut self, engine: &mut MatchingEngine, book: Option<&BookView>) -> CycleOutcome {
        let outcome = engine.run_cycle(&self.session, book, &mut self.orders, &self.ledger);
        if let CycleOutcome::Completed(report) = &outcome {
            if !report.is_empty() {
                if let Err(e) = self.refresh_history() {
                    warn!("⚠️  Order history refresh failed after fills: {}", e);
                }
            }
        }
        outcome
    }
}

/// Credit paper funds, creating the portfolio on first use
pub fn fund_account<L: Ledger + ?Sized>(ledger: &L, user_id: i64, amount: Decimal) -> TradingResult<Portfolio> {
    if amount <= Decimal::ZERO {
        return Err(TradingError::InvalidParameter(
            "amount".to_string(),
            format!("must be positive, got {}", amount),
        ));
    }

    match ledger.get_by_user_id(user_id)? {
        None => {
            let portfolio = Portfolio::funded(user_id, amount);
            ledger.create_portfolio(&portfolio)?;
            info!("💰 Opened paper account for user {} with {}", user_id, amount);
            Ok(portfolio)
        }
        Some(mut portfolio) => {
            let funds = portfolio.funds().checked_add(amount).ok_or_else(|| {
                TradingError::InvalidParameter("amount".to_string(), "balance overflow".to_string())
            })?;
            portfolio.available_funds = Some(funds);
            portfolio.total_balance = Some(portfolio.total_balance.unwrap_or_default().saturating_add(amount));
            portfolio.last_updated = Some(chrono::Utc::now().to_rfc3339());
            ledger.update(user_id, &portfolio)?;
            info!("💰 Added {} to user {} (available {})", amount, user_id, funds);
            Ok(portfolio)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteLedger, TradeStatus, TradeStore};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn desk() -> OrderDesk<SqliteLedger> {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        OrderDesk::new(SqliteLedger::new(db), PersistFailurePolicy::Revert)
    }

    #[test]
    fn test_place_requires_session() {
        let mut desk = desk();
        assert!(matches!(
            desk.place_order("bid", "100", "1"),
            Err(TradingError::NoActiveSession)
        ));
        assert!(desk.orders().is_empty());
    }

    #[test]
    fn test_bad_input_is_rejected_without_mutation() {
        let mut desk = desk();
        desk.open(1).unwrap();

        assert!(desk.place_order("bid", "abc", "1").is_err());
        assert!(desk.place_order("bid", "100", "0").is_err());
        assert!(desk.place_order("hold", "100", "1").is_err());

        assert!(desk.orders().is_empty());
        assert!(desk.ledger().list_by_user(1).unwrap().is_empty());
    }

    #[test]
    fn test_place_binds_trade_id() {
        let mut desk = desk();
        desk.open(1).unwrap();

        let trade = desk.place_order("buy", "101.0", "1").unwrap();
        let order = desk.orders().get(Side::Bid, &d("101.0")).unwrap();
        assert_eq!(order.trade_id, Some(trade.id));
        assert!(desk.orders().pending_commands().is_empty());
    }

    #[test]
    fn test_cancel_removes_order_and_checks_owner() {
        let mut desk = desk();
        desk.open(1).unwrap();
        let trade = desk.place_order("ask", "105", "2").unwrap();

        let cancelled = desk.cancel_order(trade.id).unwrap();
        assert_eq!(cancelled.status, TradeStatus::Cancelled);
        assert!(desk.orders().is_empty());
        assert!(matches!(desk.cancel_order(trade.id), Err(TradingError::TradeClosed(_, _))));
        assert!(matches!(desk.cancel_order(777), Err(TradingError::TradeNotFound(777))));

        // another user's trade looks like a missing one
        let other = desk
            .ledger()
            .create(&NewTrade { user_id: 2, trade_type: Side::Bid, price: d("1"), amount: d("1") })
            .unwrap();
        assert!(matches!(desk.cancel_order(other.id), Err(TradingError::TradeNotFound(_))));
    }

    #[test]
    fn test_fund_account_creates_then_tops_up() {
        let desk = desk();
        let first = fund_account(desk.ledger(), 4, d("1000")).unwrap();
        assert_eq!(first.funds(), d("1000"));

        let second = fund_account(desk.ledger(), 4, d("250.5")).unwrap();
        assert_eq!(second.funds(), d("1250.5"));
        assert!(fund_account(desk.ledger(), 4, d("-1")).is_err());
    }

    #[test]
    fn test_refresh_picks_up_orders_from_another_desk() {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        let ledger = SqliteLedger::new(db);

        let mut running = OrderDesk::new(ledger.clone(), PersistFailurePolicy::Revert);
        running.open(1).unwrap();
        let mut other = OrderDesk::new(ledger, PersistFailurePolicy::Revert);
        other.open(1).unwrap();

        let placed = other.place_order("bid", "101", "1").unwrap();
        assert!(running.orders().is_empty());

        assert_eq!(running.refresh().unwrap(), 1);
        assert_eq!(running.orders().get(Side::Bid, &d("101")).unwrap().trade_id, Some(placed.id));
        assert_eq!(running.history().len(), 1);

        other.cancel_order(placed.id).unwrap();
        assert_eq!(running.refresh().unwrap(), 0);
        assert!(running.orders().is_empty());
    }

    #[test]
    fn test_history_refresh() {
        let mut desk = desk();
        desk.open(1).unwrap();
        desk.place_order("bid", "100", "1").unwrap();
        desk.place_order("ask", "110", "1").unwrap();

        assert_eq!(desk.refresh_history().unwrap(), 2);
        assert_eq!(desk.history()[0].trade_type, Side::Ask);
    }
}
