// Configuration management for the paper exchange

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete configuration structure matching config.toml.example
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Levels per side kept in published book views
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Levels requested per side in the REST snapshot
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_snapshot_retry_backoff")]
    pub snapshot_retry_backoff_ms: u64,
    #[serde(default = "default_max_retry_backoff")]
    pub max_retry_backoff_ms: u64,
    /// Max depth events held while waiting for a usable snapshot
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    /// Trade update and portfolio update share one transaction per fill
    Atomic,
    /// Bulk trade update first, then one portfolio update per fill
    Batched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistFailurePolicy {
    /// Undo the optimistic in-memory change
    Revert,
    /// Leave the optimistic order in place
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_ms: u64,
    #[serde(default = "default_history_interval")]
    pub history_interval_ms: u64,
    #[serde(default = "default_settlement_mode")]
    pub settlement_mode: SettlementMode,
    #[serde(default = "default_persist_failure_policy")]
    pub on_persist_failure: PersistFailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log every merged book refresh at debug level
    #[serde(default)]
    pub log_book_updates: bool,
}

// Default value functions
fn default_symbol() -> String { crate::types::DEFAULT_SYMBOL.to_string() }
fn default_ws_url() -> String { "wss://stream.binance.com:9443/ws".to_string() }
fn default_rest_url() -> String { "https://api.binance.com".to_string() }
fn default_depth() -> usize { crate::types::DEFAULT_BOOK_DEPTH }
fn default_snapshot_limit() -> usize { 1000 }
fn default_snapshot_retry_backoff() -> u64 { 500 }
fn default_max_retry_backoff() -> u64 { 30_000 }
fn default_buffer_capacity() -> usize { 10_000 }
fn default_reconnect_delay() -> u64 { 1_000 }
fn default_cycle_interval() -> u64 { 3_000 }
fn default_history_interval() -> u64 { 2_000 }
fn default_settlement_mode() -> SettlementMode { SettlementMode::Atomic }
fn default_persist_failure_policy() -> PersistFailurePolicy { PersistFailurePolicy::Revert }
fn default_db_path() -> String { "data/paper_exchange.db".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            ws_url: default_ws_url(),
            rest_url: default_rest_url(),
            depth: default_depth(),
            snapshot_limit: default_snapshot_limit(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            snapshot_retry_backoff_ms: default_snapshot_retry_backoff(),
            max_retry_backoff_ms: default_max_retry_backoff(),
            buffer_capacity: default_buffer_capacity(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval(),
            history_interval_ms: default_history_interval(),
            settlement_mode: default_settlement_mode(),
            on_persist_failure: default_persist_failure_policy(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_book_updates: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            tracing::info!("📁 Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    /// Stream name for the symbol's diff-depth feed
    pub fn depth_stream_url(&self) -> String {
        format!(
            "{}/{}@depth@100ms",
            self.market.ws_url.trim_end_matches('/'),
            self.market.symbol.to_lowercase()
        )
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market.symbol.trim().is_empty() {
            return Err(ConfigError::Validation("symbol must not be empty".to_string()));
        }

        if self.market.depth == 0 {
            return Err(ConfigError::Validation("depth must be greater than 0".to_string()));
        }

        if self.market.snapshot_limit < self.market.depth {
            return Err(ConfigError::Validation(
                "snapshot_limit must be at least depth".to_string()
            ));
        }

        if self.matching.cycle_interval_ms == 0 {
            return Err(ConfigError::Validation("cycle_interval_ms must be greater than 0".to_string()));
        }

        if self.matching.history_interval_ms == 0 {
            return Err(ConfigError::Validation("history_interval_ms must be greater than 0".to_string()));
        }

        if self.feed.snapshot_retry_backoff_ms == 0
            || self.feed.snapshot_retry_backoff_ms > self.feed.max_retry_backoff_ms
        {
            return Err(ConfigError::Validation(
                "snapshot_retry_backoff_ms must be positive and not exceed max_retry_backoff_ms".to_string()
            ));
        }

        if self.feed.buffer_capacity == 0 {
            return Err(ConfigError::Validation("buffer_capacity must be greater than 0".to_string()));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Validation(format!(
                "unknown log level '{}'", self.logging.level
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
