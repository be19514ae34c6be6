// Order Book Replica
// Maintains a local copy of the exchange book from a REST snapshot plus the
// diff-depth stream, following the snapshot + buffered-diff protocol.

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::types::{PriceLevel, Side};

/// Incremental depth update covering update ids `[first_update_id, final_update_id]`
#[derive(Debug, Clone, PartialEq)]
pub struct DepthEvent {
    pub first_update_id: u64, // U
    pub final_update_id: u64, // u
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Full book state as of `last_update_id`
#[derive(Debug, Clone, PartialEq)]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Immutable top-of-book view handed to readers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookView {
    pub last_update_id: u64,
    /// Highest price first
    pub bids: Vec<PriceLevel>,
    /// Lowest price first
    pub asks: Vec<PriceLevel>,
}

impl BookView {
    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Collecting stream events until a usable snapshot arrives
    Buffering,
    /// Snapshot applied, events applied as they arrive
    Live,
}

/// What happened to a snapshot offered to the replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Snapshot and every retained buffered event were applied
    Applied { replayed: usize },
    /// The buffer already starts after the snapshot; fetch a newer one
    Stale { snapshot_id: u64, first_buffered: u64 },
}

/// What happened to a single depth event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Buffered,
    Applied,
    /// Already covered by `last_update_id`
    Ignored,
    /// A gap was detected; state was discarded and the protocol restarts
    Desynced { expected: u64, received: u64 },
}

/// Locally replicated order book
pub struct OrderBookReplica {
    pub symbol: String,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: u64,
    state: SyncState,
    buffer: VecDeque<DepthEvent>,
    buffer_capacity: usize,
    depth: usize,
    resyncs: u64,
    publisher: watch::Sender<BookView>,
}

impl OrderBookReplica {
    /// Create new empty replica that buffers until a snapshot is applied
    pub fn new(symbol: impl Into<String>, depth: usize, buffer_capacity: usize) -> Self {
        let (publisher, _) = watch::channel(BookView::default());
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            state: SyncState::Buffering,
            buffer: VecDeque::new(),
            buffer_capacity: buffer_capacity.max(1),
            depth,
            resyncs: 0,
            publisher,
        }
    }

    /// Receive a fresh top-N view after every applied update
    pub fn subscribe(&self) -> watch::Receiver<BookView> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == SyncState::Live
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of times a sequence gap forced a full resynchronization
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn level(&self, side: Side, price: &Decimal) -> Option<Decimal> {
        self.levels(side).get(price).copied()
    }

    /// Number of price levels on each side
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    fn levels(&self, side: Side) -> &BTreeMap<Decimal, Decimal> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Feed one stream event through the protocol
    pub fn on_event(&mut self, event: DepthEvent) -> EventOutcome {
        match self.state {
            SyncState::Buffering => {
                if self.buffer.len() >= self.buffer_capacity {
                    warn!(
                        "⚠️  Depth buffer for {} full ({} events), dropping oldest",
                        self.symbol, self.buffer_capacity
                    );
                    self.buffer.pop_front();
                }
                self.buffer.push_back(event);
                EventOutcome::Buffered
            }
            SyncState::Live => self.apply_live(event),
        }
    }

    /// Offer a REST snapshot; applies it only if the buffer connects to it
    pub fn apply_snapshot(&mut self, snapshot: DepthSnapshot) -> SnapshotOutcome {
        let snapshot_id = snapshot.last_update_id;

        // Drop events the snapshot already covers
        while self
            .buffer
            .front()
            .map_or(false, |event| event.final_update_id <= snapshot_id)
        {
            self.buffer.pop_front();
        }

        if let Some(first) = self.buffer.front() {
            if first.first_update_id > snapshot_id {
                debug!(
                    "Snapshot {} for {} is behind buffered event U={}",
                    snapshot_id, self.symbol, first.first_update_id
                );
                return SnapshotOutcome::Stale {
                    snapshot_id,
                    first_buffered: first.first_update_id,
                };
            }
        }

        self.bids.clear();
        self.asks.clear();
        for level in snapshot.bids {
            upsert(&mut self.bids, level);
        }
        for level in snapshot.asks {
            upsert(&mut self.asks, level);
        }
        self.last_update_id = snapshot_id;
        self.state = SyncState::Live;

        info!(
            "📖 Initialized {} book from snapshot {}: {} bids, {} asks",
            self.symbol,
            snapshot_id,
            self.bids.len(),
            self.asks.len()
        );

        let pending: Vec<DepthEvent> = self.buffer.drain(..).collect();
        let mut replayed = 0;
        for event in pending {
            match self.apply_live(event) {
                EventOutcome::Applied => replayed += 1,
                EventOutcome::Desynced { .. } => {
                    // Buffer had a hole after the snapshot; protocol already reset
                    return SnapshotOutcome::Applied { replayed };
                }
                _ => {}
            }
        }

        if replayed == 0 {
            self.publish();
        }

        SnapshotOutcome::Applied { replayed }
    }

    fn apply_live(&mut self, event: DepthEvent) -> EventOutcome {
        if event.final_update_id <= self.last_update_id {
            return EventOutcome::Ignored;
        }

        let expected = self.last_update_id + 1;
        if event.first_update_id > expected {
            warn!(
                "⚠️  Sequence gap on {}: expected U<={}, got U={} (u={}); resynchronizing",
                self.symbol, expected, event.first_update_id, event.final_update_id
            );
            self.reset();
            self.resyncs += 1;
            return EventOutcome::Desynced {
                expected,
                received: event.first_update_id,
            };
        }

        for level in event.bids {
            upsert(&mut self.bids, level);
        }
        for level in event.asks {
            upsert(&mut self.asks, level);
        }
        self.last_update_id = event.final_update_id;
        self.publish();

        EventOutcome::Applied
    }

    /// Discard all state and go back to buffering
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.buffer.clear();
        self.last_update_id = 0;
        self.state = SyncState::Buffering;
    }

    /// Top `n` levels per side, bids descending and asks ascending
    pub fn top_levels(&self, n: usize) -> BookView {
        let bids = self
            .bids
            .iter()
            .rev()
            .take(n)
            .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
            .collect();

        let asks = self
            .asks
            .iter()
            .take(n)
            .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
            .collect();

        BookView {
            last_update_id: self.last_update_id,
            bids,
            asks,
        }
    }

    fn publish(&self) {
        // No receivers is fine; the view is still retained for later subscribers
        self.publisher.send_replace(self.top_levels(self.depth));
    }
}

fn upsert(levels: &mut BTreeMap<Decimal, Decimal>, level: PriceLevel) {
    if level.quantity.is_zero() {
        levels.remove(&level.price);
    } else {
        levels.insert(level.price, level.quantity);
    }
}
