// Virtual Order Matching Engine
// Periodically scans the user's virtual orders against the replicated book,
// fills crossing orders and settles them through the ledger.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SettlementMode;
use crate::core::session::Session;
use crate::db::{Ledger, Trade, TradeFillUpdate, TradeStatus};
use crate::error::TradingResult;
use crate::simulation::order_book::BookView;
use crate::simulation::settlement::{Fill, SettlementApplier};
use crate::simulation::virtual_orders::{VirtualBook, VirtualOrderSet};
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleState {
    Idle,
    Scanning,
    Settling,
}

/// A virtual order that crosses the best real level on the opposite side
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub trade_id: i64,
    pub side: Side,
    /// Limit price of the virtual order
    pub limit_price: Decimal,
    pub virtual_amount: Decimal,
    pub real_amount: Decimal,
    /// Price of the crossed real level
    pub price: Decimal,
}

/// One fill produced by a matching cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub virtual_order_id: i64,
    pub side: Side,
    pub match_price: Decimal,
    pub match_amount: Decimal,
    pub remaining_amount: Decimal,
    pub is_full: bool,
    pub execution_price: Decimal,
}

/// Fills of one cycle, grouped by the side of the virtual order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub bids: Vec<MatchResult>,
    pub asks: Vec<MatchResult>,
}

impl MatchReport {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchResult> {
        self.bids.iter().chain(self.asks.iter())
    }

    fn push(&mut self, result: MatchResult) {
        match result.side {
            Side::Bid => self.bids.push(result),
            Side::Ask => self.asks.push(result),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle is still settling
    InFlight,
    NoSession,
    BookUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed(MatchReport),
    /// A storage call failed; writes committed before the failure stand
    Aborted(String),
}

impl CycleOutcome {
    /// Fills of the cycle; empty unless it completed
    pub fn report(&self) -> MatchReport {
        match self {
            CycleOutcome::Completed(report) => report.clone(),
            _ => MatchReport::default(),
        }
    }
}

/// Running totals across cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub cycles: u64,
    pub full_matches: u64,
    pub partial_matches: u64,
    pub total_volume: Decimal,
}

/// Held for the duration of a cycle; releases the reentrancy flag on drop
pub struct CycleGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct PlannedFill {
    update: TradeFillUpdate,
    user_id: i64,
    fill: Fill,
    result: MatchResult,
}

pub struct MatchingEngine {
    settlement_mode: SettlementMode,
    in_flight: Arc<AtomicBool>,
    state: CycleState,
    stats: EngineStats,
}

impl MatchingEngine {
    pub fn new(settlement_mode: SettlementMode) -> Self {
        Self {
            settlement_mode,
            in_flight: Arc::new(AtomicBool::new(false)),
            state: CycleState::Idle,
            stats: EngineStats::default(),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn settlement_mode(&self) -> SettlementMode {
        self.settlement_mode
    }

    /// Claim the cycle slot, or `None` if a cycle is already running
    pub fn try_begin_cycle(&self) -> Option<CycleGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard {
                flag: Arc::clone(&self.in_flight),
            })
    }

    /// Run one matching cycle for the session's user
    pub fn run_cycle<L: Ledger + ?Sized>(
        &mut self,
        session: &Session,
        book: Option<&BookView>,
        orders: &mut VirtualOrderSet,
        ledger: &L,
    ) -> CycleOutcome {
        let Some(_guard) = self.try_begin_cycle() else {
            debug!("Matching cycle skipped: previous cycle still in flight");
            return CycleOutcome::Skipped(SkipReason::InFlight);
        };
        let Some(user_id) = session.current_user() else {
            return CycleOutcome::Skipped(SkipReason::NoSession);
        };
        let Some(book) = book else {
            return CycleOutcome::Skipped(SkipReason::BookUnavailable);
        };

        self.state = CycleState::Scanning;
        let candidates = find_candidates(book, &orders.snapshot());

        let outcome = if candidates.is_empty() {
            CycleOutcome::Completed(MatchReport::default())
        } else {
            self.state = CycleState::Settling;
            match self.settle_candidates(user_id, &candidates, orders, ledger) {
                Ok(report) => CycleOutcome::Completed(report),
                Err(e) => {
                    error!("❌ Matching cycle aborted: {}", e);
                    CycleOutcome::Aborted(e.to_string())
                }
            }
        };

        self.state = CycleState::Idle;
        self.stats.cycles += 1;
        outcome
    }

    fn settle_candidates<L: Ledger + ?Sized>(
        &mut self,
        user_id: i64,
        candidates: &[Candidate],
        orders: &mut VirtualOrderSet,
        ledger: &L,
    ) -> TradingResult<MatchReport> {
        let ids: Vec<i64> = candidates.iter().map(|c| c.trade_id).collect();
        let trades: HashMap<i64, Trade> = ledger
            .get_bulk_by_ids(&ids)?
            .into_iter()
            .map(|trade| (trade.id, trade))
            .collect();

        let planned = plan_fills(user_id, candidates, &trades);
        if planned.is_empty() {
            return Ok(MatchReport::default());
        }

        let mut report = MatchReport::default();
        match self.settlement_mode {
            SettlementMode::Atomic => {
                for plan in planned {
                    match ledger.fill_and_settle(&plan.update, plan.user_id, &plan.fill) {
                        Ok(_) => report.push(plan.result),
                        Err(e) => warn!(
                            "⚠️  Fill for trade {} rolled back: {}",
                            plan.update.id, e
                        ),
                    }
                }
            }
            SettlementMode::Batched => {
                let updates: Vec<TradeFillUpdate> = planned.iter().map(|p| p.update.clone()).collect();
                ledger.update_bulk(&updates)?;

                let applier = SettlementApplier::new(ledger);
                for plan in planned {
                    if !applier.apply(plan.user_id, &plan.fill) {
                        warn!(
                            "⚠️  Trade {} filled without settlement; balances not updated",
                            plan.update.id
                        );
                    }
                    report.push(plan.result);
                }
            }
        }

        if !report.is_empty() {
            orders.reload(ledger, user_id)?;
            self.record(&report);
        }

        Ok(report)
    }

    fn record(&mut self, report: &MatchReport) {
        for result in report.iter() {
            if result.is_full {
                self.stats.full_matches += 1;
            } else {
                self.stats.partial_matches += 1;
            }
            self.stats.total_volume = self.stats.total_volume.saturating_add(result.match_amount);

            info!(
                "💱 {} trade {} {} {} @ {} (limit {}), remaining {}",
                if result.is_full { "Filled" } else { "Partially filled" },
                result.virtual_order_id,
                result.side,
                result.match_amount,
                result.execution_price,
                result.match_price,
                result.remaining_amount
            );
        }
    }
}

/// Best crossing real level for every persisted virtual order, at most one per order
pub fn find_candidates(book: &BookView, orders: &VirtualBook) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for side in Side::ALL {
        let real_levels = book.side(side.opposite());
        for order in orders.side(side) {
            let Some(trade_id) = order.trade_id else {
                continue;
            };

            // Real levels are best-first, so the first crossing level is the best one
            if let Some(level) = real_levels
                .iter()
                .find(|level| side.crosses(&order.price, &level.price))
            {
                candidates.push(Candidate {
                    trade_id,
                    side,
                    limit_price: order.price,
                    virtual_amount: order.amount,
                    real_amount: level.quantity,
                    price: level.price,
                });
            }
        }
    }

    candidates
}

/// Fill quantity for a candidate, never exceeding what the trade has left
pub fn fill_amount(candidate: &Candidate, trade: &Trade) -> Decimal {
    candidate
        .virtual_amount
        .min(candidate.real_amount)
        .min(trade.remaining())
}

fn plan_fills(user_id: i64, candidates: &[Candidate], trades: &HashMap<i64, Trade>) -> Vec<PlannedFill> {
    let mut seen = HashSet::new();
    let mut planned = Vec::new();

    for candidate in candidates {
        if !seen.insert(candidate.trade_id) {
            continue;
        }

        let Some(trade) = trades.get(&candidate.trade_id) else {
            debug!("Trade {} vanished before settlement, skipping", candidate.trade_id);
            continue;
        };
        if trade.status.is_terminal() {
            debug!(
                "Trade {} already {}, skipping",
                trade.id,
                trade.status.to_string()
            );
            continue;
        }
        if trade.user_id != user_id {
            warn!(
                "⚠️  Trade {} belongs to user {}, not session user {}",
                trade.id, trade.user_id, user_id
            );
            continue;
        }

        let amount = fill_amount(candidate, trade);
        if amount <= Decimal::ZERO {
            continue;
        }

        let new_filled = trade.filled_amount + amount;
        let status = if new_filled >= trade.amount {
            TradeStatus::Filled
        } else {
            TradeStatus::PartiallyFilled
        };

        planned.push(PlannedFill {
            update: TradeFillUpdate {
                id: trade.id,
                filled_amount: new_filled,
                status,
            },
            user_id: trade.user_id,
            fill: Fill {
                side: candidate.side,
                amount,
                price: candidate.price,
            },
            result: MatchResult {
                virtual_order_id: trade.id,
                side: candidate.side,
                match_price: candidate.limit_price,
                match_amount: amount,
                remaining_amount: trade.amount - new_filled,
                is_full: status == TradeStatus::Filled,
                execution_price: candidate.price,
            },
        });
    }

    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::virtual_orders::VirtualOrder;
    use crate::types::PriceLevel;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn order(side: Side, price: &str, amount: &str, trade_id: Option<i64>) -> VirtualOrder {
        VirtualOrder { side, price: d(price), amount: d(amount), is_virtual: true, trade_id }
    }

    fn book() -> BookView {
        BookView {
            last_update_id: 5,
            bids: vec![PriceLevel::new(d("100.0"), d("2")), PriceLevel::new(d("99.0"), d("4"))],
            asks: vec![PriceLevel::new(d("99.5"), d("5")), PriceLevel::new(d("100.5"), d("1"))],
        }
    }

    fn trade(id: i64, amount: &str, filled: &str) -> Trade {
        Trade {
            id,
            user_id: 1,
            trade_type: Side::Bid,
            price: d("101"),
            amount: d(amount),
            filled_amount: d(filled),
            status: TradeStatus::derive(d(filled), d(amount)),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_candidates_take_best_crossing_level_only() {
        let orders = VirtualBook {
            bids: vec![order(Side::Bid, "101.0", "1", Some(42))],
            asks: vec![],
        };
        let candidates = find_candidates(&book(), &orders);

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.trade_id, 42);
        assert_eq!(c.side, Side::Bid);
        assert_eq!(c.price, d("99.5"));
        assert_eq!(c.real_amount, d("5"));
        assert_eq!(c.virtual_amount, d("1"));
    }

    #[test]
    fn test_candidates_ignore_unpersisted_and_non_crossing() {
        let orders = VirtualBook {
            bids: vec![
                order(Side::Bid, "105", "1", None),
                order(Side::Bid, "99.0", "1", Some(1)),
            ],
            asks: vec![
                order(Side::Ask, "99.5", "2", Some(2)),
                order(Side::Ask, "100.5", "1", Some(3)),
            ],
        };
        let candidates = find_candidates(&book(), &orders);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].trade_id, 2);
        assert_eq!(candidates[0].side, Side::Ask);
        // ask crosses the highest bid
        assert_eq!(candidates[0].price, d("100.0"));
        assert_eq!(candidates[0].real_amount, d("2"));
    }

    #[test]
    fn test_fill_amount_is_min_and_never_overfills() {
        let candidate = Candidate {
            trade_id: 1,
            side: Side::Bid,
            limit_price: d("101"),
            virtual_amount: d("3"),
            real_amount: d("2"),
            price: d("99.5"),
        };
        assert_eq!(fill_amount(&candidate, &trade(1, "3", "0")), d("2"));
        // fresh row has less left than the in-memory order thinks
        assert_eq!(fill_amount(&candidate, &trade(1, "3", "2.5")), d("0.5"));
    }

    #[test]
    fn test_plan_skips_terminal_and_missing() {
        let candidates = vec![
            Candidate {
                trade_id: 1,
                side: Side::Bid,
                limit_price: d("101"),
                virtual_amount: d("1"),
                real_amount: d("5"),
                price: d("99.5"),
            },
            Candidate {
                trade_id: 2,
                side: Side::Bid,
                limit_price: d("101"),
                virtual_amount: d("1"),
                real_amount: d("5"),
                price: d("99.5"),
            },
        ];
        let mut cancelled = trade(1, "1", "0");
        cancelled.status = TradeStatus::Cancelled;
        let trades = HashMap::from([(1, cancelled)]);

        assert!(plan_fills(1, &candidates, &trades).is_empty());
    }

    #[test]
    fn test_plan_status_derivation() {
        let candidate = Candidate {
            trade_id: 9,
            side: Side::Bid,
            limit_price: d("101"),
            virtual_amount: d("1"),
            real_amount: d("0.4"),
            price: d("99.5"),
        };
        let trades = HashMap::from([(9, trade(9, "1", "0"))]);
        let planned = plan_fills(1, &[candidate], &trades);

        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].update.status, TradeStatus::PartiallyFilled);
        assert_eq!(planned[0].update.filled_amount, d("0.4"));
        assert_eq!(planned[0].result.remaining_amount, d("0.6"));
        assert!(!planned[0].result.is_full);
    }

    #[test]
    fn test_guard_blocks_second_cycle() {
        let engine = MatchingEngine::new(SettlementMode::Atomic);
        let guard = engine.try_begin_cycle();
        assert!(guard.is_some());
        assert!(engine.try_begin_cycle().is_none());
        drop(guard);
        assert!(engine.try_begin_cycle().is_some());
    }
}
