// Simulation Module
// Local replica of the exchange book and the virtual order matching engine

pub mod depth_sync;
pub mod matching_engine;
pub mod merger;
pub mod order_book;
pub mod settlement;
pub mod virtual_orders;

pub use depth_sync::{DepthStream, DepthSynchronizer, FeedStatus, SnapshotSource};
pub use matching_engine::{
    CycleOutcome, CycleState, EngineStats, MatchReport, MatchResult, MatchingEngine, SkipReason,
};
pub use merger::{merge_book, LevelSource, MergedBook, MergedLevel};
pub use order_book::{
    BookView, DepthEvent, DepthSnapshot, EventOutcome, OrderBookReplica, SnapshotOutcome, SyncState,
};
pub use settlement::{settle, Fill, SettlementApplier};
pub use virtual_orders::{OrderCommand, VirtualOrder, VirtualOrderSet};
