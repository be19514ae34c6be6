// Paper Exchange Library
//
// Simulated trading against a live exchange order book: a replicated depth
// book, the user's virtual orders, and a matching engine that fills and
// settles them against paper balances.

pub mod clients;
pub mod config;
pub mod core;
pub mod db;          // SQLite database layer
pub mod error;       // Unified error handling
pub mod simulation;
pub mod types;

// Re-export error types
pub use error::{TradingError, TradingResult};

// Re-export configuration
pub use config::{Config, ConfigError, PersistFailurePolicy, SettlementMode};

// Re-export common types
pub use types::{PriceLevel, Side};

// Re-export client types
pub use clients::{BinanceDepthStream, HttpSnapshotSource};

// Re-export database types
pub use db::{Database, Ledger, Portfolio, PortfolioStore, SqliteLedger, Trade, TradeStatus, TradeStore};

// Re-export session and runtime
pub use core::{ExchangeRuntime, FeedHandle, OrderDesk, Session};

// Re-export simulation components
pub use simulation::{
    merge_book, BookView, DepthSynchronizer, FeedStatus, MatchResult, MatchingEngine,
    OrderBookReplica, VirtualOrderSet,
};
