// Retry with exponential backoff for feed and snapshot calls

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::config::FeedConfig;
use crate::error::TradingResult;

/// Exponential backoff with jitter, capped at `max_delay`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    /// Fraction of the delay added at random, 0.0 disables jitter
    jitter: f64,
    current: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: 0.2,
            current: base_delay,
        }
    }

    pub fn from_feed_config(config: &FeedConfig) -> Self {
        Self::new(
            Duration::from_millis(config.snapshot_retry_backoff_ms),
            Duration::from_millis(config.max_retry_backoff_ms),
            2.0,
        )
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt; grows on every call
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        self.current = std::cmp::min(
            Duration::from_millis((self.current.as_millis() as f64 * self.backoff_multiplier) as u64),
            self.max_delay,
        );

        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            std::cmp::min(delay.mul_f64(1.0 + extra), self.max_delay)
        } else {
            delay
        }
    }

    /// Start again from the base delay after a success
    pub fn reset(&mut self) {
        self.current = self.base_delay;
    }

    /// Keep calling `operation` until it succeeds, sleeping between attempts
    pub async fn retry_forever<F, Fut, T>(&mut self, what: &str, mut operation: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TradingResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    self.reset();
                    return value;
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.next_delay();
                    warn!(
                        "⚠️  {} failed (attempt {}, {}), retrying in {:?}: {}",
                        what,
                        attempt,
                        e.category(),
                        delay,
                        e
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(500), // 500ms base delay
            Duration::from_secs(30),    // 30s max delay
            2.0,                        // Double delay each time
        )
    }
}
