// Virtual Order Set
// The user's simulated resting orders, mirrored from persisted trades.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PersistFailurePolicy;
use crate::db::{Trade, TradeStore};
use crate::error::TradingResult;
use crate::types::Side;

/// A simulated resting order, never routed to the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualOrder {
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub is_virtual: bool,
    /// Set once the order mirrors a persisted trade
    pub trade_id: Option<i64>,
}

/// Immutable copy of the set, best price first on each side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualBook {
    pub bids: Vec<VirtualOrder>,
    pub asks: Vec<VirtualOrder>,
}

impl VirtualBook {
    pub fn side(&self, side: Side) -> &[VirtualOrder] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// An optimistic in-memory change waiting for its persistence result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCommand {
    pub id: Uuid,
    pub side: Side,
    pub price: Decimal,
    /// Signed change applied to the order at `price`
    pub amount: Decimal,
    pub issued_at: DateTime<Utc>,
}

/// What `acknowledge` did with a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Persisted; the order is now bound to this trade id
    Bound(i64),
    /// Persisted, but the order already carried a trade id (merged placement)
    Confirmed,
    /// Persistence failed and the optimistic change was undone
    Reverted,
    /// Persistence failed and the optimistic change was left in place
    Kept,
    /// The command was not pending (already acknowledged or dropped by a reload)
    Unknown,
}

pub struct VirtualOrderSet {
    bids: BTreeMap<Decimal, VirtualOrder>,
    asks: BTreeMap<Decimal, VirtualOrder>,
    pending: HashMap<Uuid, OrderCommand>,
    on_persist_failure: PersistFailurePolicy,
}

impl VirtualOrderSet {
    pub fn new(on_persist_failure: PersistFailurePolicy) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            pending: HashMap::new(),
            on_persist_failure,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, VirtualOrder> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn side_map(&self, side: Side) -> &BTreeMap<Decimal, VirtualOrder> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Merge `amount` into the order at (side, price). Negative amounts reduce it;
    /// an order whose amount reaches zero or below is removed.
    pub fn add(&mut self, side: Side, price: Decimal, amount: Decimal) -> OrderCommand {
        self.apply_delta(side, price, amount, None);

        let command = OrderCommand {
            id: Uuid::new_v4(),
            side,
            price,
            amount,
            issued_at: Utc::now(),
        };
        self.pending.insert(command.id, command.clone());
        command
    }

    fn apply_delta(&mut self, side: Side, price: Decimal, amount: Decimal, trade_id: Option<i64>) {
        let orders = self.side_mut(side);
        let merged = orders
            .get(&price)
            .map(|existing| existing.amount + amount)
            .unwrap_or(amount);

        if merged <= Decimal::ZERO {
            orders.remove(&price);
            return;
        }

        orders
            .entry(price)
            .and_modify(|order| {
                order.amount = merged;
                if order.trade_id.is_none() {
                    order.trade_id = trade_id;
                }
            })
            .or_insert(VirtualOrder {
                side,
                price,
                amount: merged,
                is_virtual: true,
                trade_id,
            });
    }

    /// Reconcile a command with the result of persisting it
    pub fn acknowledge<E: std::fmt::Display>(
        &mut self,
        command_id: Uuid,
        result: Result<&Trade, E>,
    ) -> AckOutcome {
        let Some(command) = self.pending.remove(&command_id) else {
            return AckOutcome::Unknown;
        };

        match result {
            Ok(trade) => {
                let Some(order) = self.side_mut(command.side).get_mut(&command.price) else {
                    return AckOutcome::Confirmed;
                };
                if order.trade_id.is_none() {
                    order.trade_id = Some(trade.id);
                    AckOutcome::Bound(trade.id)
                } else {
                    AckOutcome::Confirmed
                }
            }
            Err(e) => match self.on_persist_failure {
                PersistFailurePolicy::Revert => {
                    warn!(
                        "⚠️  Order {} {} @ {} not persisted ({}), reverting",
                        command.side, command.amount, command.price, e
                    );
                    self.apply_delta(command.side, command.price, -command.amount, None);
                    AckOutcome::Reverted
                }
                PersistFailurePolicy::Keep => {
                    warn!(
                        "⚠️  Order {} {} @ {} not persisted ({}), keeping in memory",
                        command.side, command.amount, command.price, e
                    );
                    AckOutcome::Kept
                }
            },
        }
    }

    /// Commands applied in memory with no persistence result yet
    pub fn pending_commands(&self) -> Vec<&OrderCommand> {
        let mut commands: Vec<&OrderCommand> = self.pending.values().collect();
        commands.sort_by_key(|c| c.issued_at);
        commands
    }

    pub fn remove(&mut self, side: Side, price: &Decimal) -> Option<VirtualOrder> {
        self.side_mut(side).remove(price)
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.pending.clear();
    }

    /// Rebuild from the user's open trades. On a storage error the set is left as it was.
    pub fn reload<S: TradeStore + ?Sized>(&mut self, store: &S, user_id: i64) -> TradingResult<usize> {
        let trades = store.list_by_user(user_id)?;
        self.load_from_trades(&trades);
        Ok(self.len())
    }

    /// Replace the contents with one order per active trade, oldest trade first
    pub fn load_from_trades(&mut self, trades: &[Trade]) {
        self.clear();

        let mut active: Vec<&Trade> = trades.iter().filter(|t| t.is_active()).collect();
        active.sort_by_key(|t| t.id);

        for trade in active {
            self.apply_delta(trade.trade_type, trade.price, trade.remaining(), Some(trade.id));
        }

        debug!("Reloaded {} bids, {} asks", self.bids.len(), self.asks.len());
    }

    pub fn get(&self, side: Side, price: &Decimal) -> Option<&VirtualOrder> {
        self.side_map(side).get(price)
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current orders, bids descending and asks ascending by price
    pub fn snapshot(&self) -> VirtualBook {
        VirtualBook {
            bids: self.bids.values().rev().cloned().collect(),
            asks: self.asks.values().cloned().collect(),
        }
    }
}
