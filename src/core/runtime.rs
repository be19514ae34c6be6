// Exchange runtime
// One cooperative loop: matching timer, order-history timer and book notifications.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clients::{BinanceDepthStream, HttpSnapshotSource};
use crate::config::Config;
use crate::core::order_desk::OrderDesk;
use crate::db::Ledger;
use crate::error::TradingResult;
use crate::simulation::depth_sync::{DepthSynchronizer, FeedStatus};
use crate::simulation::matching_engine::{CycleOutcome, EngineStats, MatchingEngine};
use crate::simulation::order_book::BookView;

/// Read side of a running market data feed
pub struct FeedHandle {
    pub book: watch::Receiver<BookView>,
    pub status: watch::Receiver<FeedStatus>,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Wrap channels fed by something other than a spawned synchronizer
    pub fn from_channels(book: watch::Receiver<BookView>, status: watch::Receiver<FeedStatus>) -> Self {
        Self { book, status, task: None }
    }

    /// Current book, if the feed is live and has applied a snapshot
    pub fn current_book(&self) -> Option<BookView> {
        if *self.status.borrow() != FeedStatus::Live {
            return None;
        }
        let book = self.book.borrow();
        if book.last_update_id == 0 {
            None
        } else {
            Some(book.clone())
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the depth synchronizer for the configured symbol
pub fn spawn_feed(config: &Config) -> TradingResult<FeedHandle> {
    let stream = BinanceDepthStream::new(config.depth_stream_url());
    let snapshots = HttpSnapshotSource::from_config(config)?;
    let synchronizer = DepthSynchronizer::from_config(config, stream, snapshots);

    let book = synchronizer.subscribe_book();
    let status = synchronizer.subscribe_status();
    info!("📡 Starting {} depth feed from {}", config.market.symbol, config.depth_stream_url());
    let task = tokio::spawn(synchronizer.run());

    Ok(FeedHandle {
        book,
        status,
        task: Some(task),
    })
}

/// Totals reported when the loop stops
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub stats: EngineStats,
    pub skipped_cycles: u64,
    pub aborted_cycles: u64,
}

pub struct ExchangeRuntime<L: Ledger> {
    config: Config,
    desk: OrderDesk<L>,
    engine: MatchingEngine,
}

impl<L: Ledger> ExchangeRuntime<L> {
    pub fn new(config: Config, desk: OrderDesk<L>) -> Self {
        let engine = MatchingEngine::new(config.matching.settlement_mode);
        Self { config, desk, engine }
    }

    pub fn desk(&self) -> &OrderDesk<L> {
        &self.desk
    }

    pub fn into_desk(self) -> OrderDesk<L> {
        self.desk
    }

    pub fn stats(&self) -> &EngineStats {
        self.engine.stats()
    }

    /// Run until `shutdown` resolves or `duration` elapses
    pub async fn run<F>(
        &mut self,
        feed: &mut FeedHandle,
        duration: Option<Duration>,
        shutdown: F,
    ) -> TradingResult<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let mut matching = interval(Duration::from_millis(self.config.matching.cycle_interval_ms));
        matching.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut history = interval(Duration::from_millis(self.config.matching.history_interval_ms));
        history.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = async {
            match duration {
                Some(duration) => sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        let mut summary = RunSummary::default();
        let mut book_open = true;
        let log_book_updates = self.config.logging.log_book_updates;
        let depth = self.config.market.depth;

        info!(
            "🚀 Matching every {}ms ({:?} settlement)",
            self.config.matching.cycle_interval_ms, self.config.matching.settlement_mode
        );

        loop {
            tokio::select! {
                _ = matching.tick() => {
                    let book = feed.current_book();
                    match self.desk.run_matching(&mut self.engine, book.as_ref()) {
                        CycleOutcome::Skipped(reason) => {
                            summary.skipped_cycles += 1;
                            debug!("Matching cycle skipped: {:?}", reason);
                        }
                        CycleOutcome::Aborted(_) => summary.aborted_cycles += 1,
                        CycleOutcome::Completed(_) => {}
                    }
                }
                _ = history.tick() => {
                    if let Err(e) = self.desk.refresh() {
                        warn!("⚠️  Order refresh failed: {}", e);
                    }
                }
                changed = feed.book.changed(), if book_open => {
                    if changed.is_err() {
                        warn!("⚠️  Book feed stopped publishing");
                        book_open = false;
                    } else if log_book_updates {
                        let view = feed.book.borrow_and_update().clone();
                        let merged = self.desk.merged_book(&view, depth);
                        debug!(
                            "Book {}: best bid {:?}, best ask {:?}, {} merged bids, {} merged asks",
                            view.last_update_id,
                            view.best_bid().map(|l| l.price),
                            view.best_ask().map(|l| l.price),
                            merged.bids.len(),
                            merged.asks.len()
                        );
                    }
                }
                _ = &mut deadline => {
                    info!("⏰ Session duration reached");
                    break;
                }
                _ = &mut shutdown => {
                    info!("🛑 Received shutdown signal");
                    break;
                }
            }
        }

        summary.stats = self.engine.stats().clone();
        Ok(summary)
    }
}
