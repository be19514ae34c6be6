// Depth Synchronizer
// Drives the order book replica from a live depth stream and REST snapshots.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, FeedConfig};
use crate::core::error_handling::RetryPolicy;
use crate::error::TradingResult;
use crate::simulation::order_book::{
    BookView, DepthEvent, DepthSnapshot, EventOutcome, OrderBookReplica, SnapshotOutcome,
};

/// Connectivity of the market data feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Connecting,
    Synchronizing,
    Live,
    Disconnected,
}

/// Source of full book snapshots
pub trait SnapshotSource: Send + Sync {
    fn fetch_snapshot(&self) -> impl Future<Output = TradingResult<DepthSnapshot>> + Send;
}

/// Source of incremental depth events; each `connect` opens a fresh subscription
pub trait DepthStream: Send + Sync {
    fn connect(
        &self,
    ) -> impl Future<Output = TradingResult<BoxStream<'static, TradingResult<DepthEvent>>>> + Send;
}

/// Why one connection session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    StreamClosed,
    StreamError,
}

pub struct DepthSynchronizer<S, P> {
    replica: OrderBookReplica,
    stream: S,
    snapshots: P,
    snapshot_retry: RetryPolicy,
    /// Backoff between stale snapshots; only reset once a snapshot is applied
    stale_refetch: RetryPolicy,
    reconnect_delay: Duration,
    status: watch::Sender<FeedStatus>,
}

impl<S: DepthStream, P: SnapshotSource> DepthSynchronizer<S, P> {
    pub fn new(symbol: &str, depth: usize, feed: &FeedConfig, stream: S, snapshots: P) -> Self {
        let (status, _) = watch::channel(FeedStatus::Connecting);
        Self {
            replica: OrderBookReplica::new(symbol, depth, feed.buffer_capacity),
            stream,
            snapshots,
            snapshot_retry: RetryPolicy::from_feed_config(feed),
            stale_refetch: RetryPolicy::from_feed_config(feed),
            reconnect_delay: Duration::from_millis(feed.reconnect_delay_ms),
            status,
        }
    }

    pub fn from_config(config: &Config, stream: S, snapshots: P) -> Self {
        Self::new(&config.market.symbol, config.market.depth, &config.feed, stream, snapshots)
    }

    pub fn subscribe_book(&self) -> watch::Receiver<BookView> {
        self.replica.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    pub fn replica(&self) -> &OrderBookReplica {
        &self.replica
    }

    fn set_status(&self, status: FeedStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!("Feed status {:?} -> {:?}", current, status);
                *current = status;
                true
            }
        });
    }

    /// Run forever, reconnecting after every dropped stream
    pub async fn run(mut self) {
        loop {
            let end = self.run_session().await;
            self.set_status(FeedStatus::Disconnected);
            warn!(
                "⚠️  Depth stream for {} ended ({:?}); reconnecting in {:?}",
                self.replica.symbol, end, self.reconnect_delay
            );
            sleep(self.reconnect_delay).await;
        }
    }

    /// One connection: open the stream, synchronize, apply live events until the stream ends
    pub async fn run_session(&mut self) -> SessionEnd {
        self.set_status(FeedStatus::Connecting);
        self.replica.reset();

        let mut events = match self.stream.connect().await {
            Ok(events) => events,
            Err(e) => {
                error!("❌ Failed to open depth stream: {}", e);
                return SessionEnd::StreamError;
            }
        };
        info!("🔗 Depth stream open for {}", self.replica.symbol);

        loop {
            if !self.replica.is_live() {
                self.set_status(FeedStatus::Synchronizing);
                if let Some(end) = self.synchronize(&mut events).await {
                    return end;
                }
                self.set_status(FeedStatus::Live);
            }

            match events.next().await {
                Some(Ok(event)) => {
                    if let EventOutcome::Desynced { .. } = self.replica.on_event(event) {
                        // Resync starts from buffering with the current stream
                        self.set_status(FeedStatus::Synchronizing);
                    }
                }
                Some(Err(e)) => {
                    warn!("⚠️  Depth stream error: {}", e);
                    return SessionEnd::StreamError;
                }
                None => return SessionEnd::StreamClosed,
            }
        }
    }

    /// Buffer at least one event, then fetch snapshots until one connects to the buffer
    async fn synchronize(
        &mut self,
        events: &mut BoxStream<'static, TradingResult<DepthEvent>>,
    ) -> Option<SessionEnd> {
        if self.replica.buffered() == 0 {
            match events.next().await {
                Some(Ok(event)) => {
                    self.replica.on_event(event);
                }
                Some(Err(e)) => {
                    warn!("⚠️  Depth stream error while buffering: {}", e);
                    return Some(SessionEnd::StreamError);
                }
                None => return Some(SessionEnd::StreamClosed),
            }
        }

        loop {
            let snapshots = &self.snapshots;
            let snapshot = self
                .snapshot_retry
                .retry_forever("Depth snapshot fetch", || snapshots.fetch_snapshot())
                .await;

            // Keep buffering whatever arrived while the snapshot was in flight
            while let Some(item) = events.next().now_or_never().flatten() {
                match item {
                    Ok(event) => {
                        self.replica.on_event(event);
                    }
                    Err(e) => {
                        warn!("⚠️  Depth stream error while buffering: {}", e);
                        return Some(SessionEnd::StreamError);
                    }
                }
            }

            match self.replica.apply_snapshot(snapshot) {
                SnapshotOutcome::Applied { replayed } => {
                    if self.replica.is_live() {
                        debug!("Replayed {} buffered events", replayed);
                        self.stale_refetch.reset();
                        return None;
                    }
                    // A hole inside the buffer forced a reset; start buffering again
                    match events.next().await {
                        Some(Ok(event)) => {
                            self.replica.on_event(event);
                        }
                        Some(Err(_)) => return Some(SessionEnd::StreamError),
                        None => return Some(SessionEnd::StreamClosed),
                    }
                }
                SnapshotOutcome::Stale { snapshot_id, first_buffered } => {
                    let delay = self.stale_refetch.next_delay();
                    debug!(
                        "Snapshot {} older than buffered U={}, refetching in {:?}",
                        snapshot_id, first_buffered, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TradingError;
    use crate::types::{PriceLevel, Side};
    use futures_util::Stream;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn event(first: u64, last: u64, bid: (&str, &str)) -> Option<DepthEvent> {
        Some(DepthEvent {
            first_update_id: first,
            final_update_id: last,
            bids: vec![PriceLevel::new(d(bid.0), d(bid.1))],
            asks: vec![],
        })
    }

    /// Replays events; a `None` entry yields `Pending` once, like a quiet socket
    struct ScriptedStream {
        items: VecDeque<Option<DepthEvent>>,
    }

    impl Stream for ScriptedStream {
        type Item = TradingResult<DepthEvent>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            match self.items.pop_front() {
                Some(Some(event)) => Poll::Ready(Some(Ok(event))),
                Some(None) => {
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
                None => Poll::Ready(None),
            }
        }
    }

    struct ScriptedConnector {
        sessions: Mutex<Vec<Vec<Option<DepthEvent>>>>,
    }

    impl ScriptedConnector {
        fn single(items: Vec<Option<DepthEvent>>) -> Self {
            Self { sessions: Mutex::new(vec![items]) }
        }
    }

    impl DepthStream for ScriptedConnector {
        fn connect(
            &self,
        ) -> impl Future<Output = TradingResult<BoxStream<'static, TradingResult<DepthEvent>>>> + Send {
            let next = self.sessions.lock().unwrap().pop();
            async move {
                match next {
                    Some(items) => Ok(ScriptedStream { items: items.into() }.boxed()),
                    None => Err(TradingError::FeedConnection("no more streams".to_string())),
                }
            }
        }
    }

    /// Hands out snapshots in order, repeating the last one
    struct ScriptedSnapshots {
        snapshots: Vec<DepthSnapshot>,
        calls: Arc<AtomicUsize>,
    }

    impl SnapshotSource for ScriptedSnapshots {
        fn fetch_snapshot(&self) -> impl Future<Output = TradingResult<DepthSnapshot>> + Send {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let idx = call.min(self.snapshots.len() - 1);
            let snapshot = self.snapshots[idx].clone();
            async move { Ok(snapshot) }
        }
    }

    fn snapshot(id: u64, bid: (&str, &str)) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: id,
            bids: vec![PriceLevel::new(d(bid.0), d(bid.1))],
            asks: vec![],
        }
    }

    fn feed_config() -> FeedConfig {
        FeedConfig {
            snapshot_retry_backoff_ms: 1,
            max_retry_backoff_ms: 2,
            buffer_capacity: 100,
            reconnect_delay_ms: 1,
        }
    }

    fn synchronizer(
        items: Vec<Option<DepthEvent>>,
        snapshots: Vec<DepthSnapshot>,
        calls: &Arc<AtomicUsize>,
    ) -> DepthSynchronizer<ScriptedConnector, ScriptedSnapshots> {
        DepthSynchronizer::new(
            "BTCUSDT",
            20,
            &feed_config(),
            ScriptedConnector::single(items),
            ScriptedSnapshots { snapshots, calls: Arc::clone(calls) },
        )
    }

    #[tokio::test]
    async fn test_session_synchronizes_and_goes_live() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sync = synchronizer(
            vec![event(3, 6, ("100", "1")), event(7, 8, ("101", "2"))],
            vec![snapshot(5, ("99", "1"))],
            &calls,
        );
        let book = sync.subscribe_book();

        assert_eq!(sync.run_session().await, SessionEnd::StreamClosed);
        assert_eq!(sync.replica().last_update_id(), 8);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let view = book.borrow().clone();
        assert_eq!(view.bids[0].price, d("101"));
        assert_eq!(view.bids.len(), 3);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_refetched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sync = synchronizer(
            vec![event(10, 12, ("100", "1"))],
            vec![snapshot(8, ("90", "1")), snapshot(11, ("95", "1"))],
            &calls,
        );

        sync.run_session().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sync.replica().last_update_id(), 12);
        assert_eq!(sync.replica().level(Side::Bid, &d("90")), None);
        assert_eq!(sync.replica().level(Side::Bid, &d("95")), Some(d("1")));
    }

    /// Records when each snapshot was requested
    struct TimedSnapshots {
        snapshots: Vec<DepthSnapshot>,
        fetched_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
    }

    impl SnapshotSource for TimedSnapshots {
        fn fetch_snapshot(&self) -> impl Future<Output = TradingResult<DepthSnapshot>> + Send {
            let mut fetched_at = self.fetched_at.lock().unwrap();
            let idx = fetched_at.len().min(self.snapshots.len() - 1);
            fetched_at.push(tokio::time::Instant::now());
            let snapshot = self.snapshots[idx].clone();
            async move { Ok(snapshot) }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_refetch_backs_off() {
        let fetched_at = Arc::new(Mutex::new(Vec::new()));
        let feed = FeedConfig {
            snapshot_retry_backoff_ms: 100,
            max_retry_backoff_ms: 10_000,
            buffer_capacity: 100,
            reconnect_delay_ms: 1,
        };
        let mut sync = DepthSynchronizer::new(
            "BTCUSDT",
            20,
            &feed,
            ScriptedConnector::single(vec![event(10, 12, ("100", "1"))]),
            TimedSnapshots {
                snapshots: vec![
                    snapshot(7, ("90", "1")),
                    snapshot(8, ("90", "1")),
                    snapshot(9, ("90", "1")),
                    snapshot(11, ("95", "1")),
                ],
                fetched_at: Arc::clone(&fetched_at),
            },
        );

        sync.run_session().await;
        assert_eq!(sync.replica().last_update_id(), 12);

        let fetched_at = fetched_at.lock().unwrap();
        assert_eq!(fetched_at.len(), 4);
        let gaps: Vec<_> = fetched_at.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(100));
        assert!(gaps[1] > gaps[0], "{:?}", gaps);
        assert!(gaps[2] > gaps[1], "{:?}", gaps);
    }

    #[tokio::test]
    async fn test_gap_triggers_resync() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sync = synchronizer(
            vec![
                event(5, 6, ("100", "1")),
                None,
                event(7, 7, ("100.5", "1")),
                event(9, 9, ("102", "1")), // 8 missing
                event(20, 21, ("103", "1")),
                event(22, 22, ("104", "1")),
            ],
            vec![snapshot(5, ("99", "1")), snapshot(20, ("98", "1"))],
            &calls,
        );
        let status = sync.subscribe_status();

        sync.run_session().await;
        assert_eq!(sync.replica().resyncs(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sync.replica().last_update_id(), 22);
        // nothing from before the gap survives
        assert_eq!(sync.replica().level(Side::Bid, &d("100")), None);
        assert_eq!(sync.replica().level(Side::Bid, &d("100.5")), None);
        assert_eq!(sync.replica().level(Side::Bid, &d("103")), Some(d("1")));
        assert_eq!(*status.borrow(), FeedStatus::Live);
    }

    #[tokio::test]
    async fn test_connect_failure_ends_session() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sync = synchronizer(vec![], vec![snapshot(1, ("1", "1"))], &calls);
        sync.run_session().await;

        // the only scripted stream is consumed; the next connect fails
        assert_eq!(sync.run_session().await, SessionEnd::StreamError);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
