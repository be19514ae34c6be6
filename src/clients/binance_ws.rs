// WebSocket client for the Binance diff-depth stream

use std::future::Future;
use std::str::FromStr;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::error::{TradingError, TradingResult};
use crate::simulation::depth_sync::DepthStream;
use crate::simulation::order_book::DepthEvent;
use crate::types::PriceLevel;

/// Raw `depthUpdate` message: `{"e":"depthUpdate","U":..,"u":..,"b":[[p,q]],"a":[[p,q]]}`
#[derive(Debug, Deserialize)]
struct DepthUpdateMessage {
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    asks: Vec<[String; 2]>,
}

/// Parse `[price, quantity]` string pairs into levels
pub fn parse_levels(raw: &[[String; 2]]) -> TradingResult<Vec<PriceLevel>> {
    raw.iter()
        .map(|[price, quantity]| -> TradingResult<PriceLevel> {
            Ok(PriceLevel::new(
                Decimal::from_str(price)?,
                Decimal::from_str(quantity)?,
            ))
        })
        .collect()
}

/// Parse one stream message. Returns `None` for messages that are not depth updates
/// (subscription acks and the like).
pub fn parse_depth_message(text: &str) -> TradingResult<Option<DepthEvent>> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    // Combined-stream payloads wrap the event in {"stream": .., "data": ..}
    let payload = value.get("data").cloned().unwrap_or(value);
    if payload.get("U").is_none() || payload.get("u").is_none() {
        return Ok(None);
    }

    let message: DepthUpdateMessage = serde_json::from_value(payload)?;
    if message.first_update_id > message.final_update_id {
        return Err(TradingError::FeedProtocol(format!(
            "depth update range is inverted: U={} > u={}",
            message.first_update_id, message.final_update_id
        )));
    }

    Ok(Some(DepthEvent {
        first_update_id: message.first_update_id,
        final_update_id: message.final_update_id,
        bids: parse_levels(&message.bids)?,
        asks: parse_levels(&message.asks)?,
    }))
}

/// Depth stream for one symbol, e.g. `wss://stream.binance.com:9443/ws/btcusdt@depth@100ms`
#[derive(Debug, Clone)]
pub struct BinanceDepthStream {
    url: String,
}

impl BinanceDepthStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl DepthStream for BinanceDepthStream {
    fn connect(
        &self,
    ) -> impl Future<Output = TradingResult<BoxStream<'static, TradingResult<DepthEvent>>>> + Send {
        let url = self.url.clone();
        async move {
            let (ws_stream, _) = connect_async(url.as_str()).await?;
            info!("✅ Connected to depth stream {}", url);

            // Only the read half is needed; tungstenite answers pings while reading
            let (_ws_sender, ws_receiver) = ws_stream.split();

            let events = ws_receiver
                .take_while(|message| {
                    let open = !matches!(message, Ok(Message::Close(_)));
                    if !open {
                        info!("🔌 Depth stream closed by server");
                    }
                    futures_util::future::ready(open)
                })
                .filter_map(|message| async move {
                    match message {
                        Ok(Message::Text(text)) => match parse_depth_message(&text) {
                            Ok(Some(event)) => Some(Ok(event)),
                            Ok(None) => {
                                debug!("Ignoring non-depth message: {}", text);
                                None
                            }
                            Err(e) => {
                                // A malformed message can hide an update; force a resync
                                warn!("⚠️  Unparseable depth message: {}", e);
                                Some(Err(e))
                            }
                        },
                        Ok(_) => None,
                        Err(e) => Some(Err(TradingError::from(e))),
                    }
                })
                .boxed();

            Ok(events)
        }
    }
}
