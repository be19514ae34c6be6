// REST client for Binance order book snapshots

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::clients::binance_ws::parse_levels;
use crate::config::Config;
use crate::error::{TradingError, TradingResult};
use crate::simulation::depth_sync::SnapshotSource;
use crate::simulation::order_book::DepthSnapshot;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotMessage {
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

/// Fetches `GET <base>/api/v3/depth?symbol=<SYMBOL>&limit=<n>`
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
    symbol: String,
    limit: usize,
}

impl HttpSnapshotSource {
    pub fn new(base_url: impl Into<String>, symbol: &str, limit: usize) -> TradingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_uppercase(),
            limit,
        })
    }

    pub fn from_config(config: &Config) -> TradingResult<Self> {
        Self::new(&config.market.rest_url, &config.market.symbol, config.market.snapshot_limit)
    }

    pub async fn fetch(&self) -> TradingResult<DepthSnapshot> {
        let url = format!("{}/api/v3/depth", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", self.symbol.clone()), ("limit", self.limit.to_string())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TradingError::ApiResponse(format!("{} from {}: {}", status, url, body)));
        }

        let message: SnapshotMessage = response.json().await?;
        debug!(
            "Fetched {} snapshot {} ({} bids, {} asks)",
            self.symbol,
            message.last_update_id,
            message.bids.len(),
            message.asks.len()
        );

        Ok(DepthSnapshot {
            last_update_id: message.last_update_id,
            bids: parse_levels(&message.bids)?,
            asks: parse_levels(&message.asks)?,
        })
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn fetch_snapshot(&self) -> impl Future<Output = TradingResult<DepthSnapshot>> + Send {
        self.fetch()
    }
}
