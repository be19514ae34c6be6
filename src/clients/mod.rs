// External market data clients

pub mod binance_rest;
pub mod binance_ws;

pub use binance_rest::HttpSnapshotSource;
pub use binance_ws::{parse_depth_message, BinanceDepthStream};
