//! Unified error handling for the paper exchange
//!
//! A single error type carried through the feed, matching and persistence
//! layers, with context-rich messages for the CLI.

use std::fmt;
use std::io;

/// Main error type for the paper exchange
#[derive(Debug)]
pub enum TradingError {
    // Configuration errors
    ConfigNotFound(String),
    ConfigParse(String),
    ConfigValidation(String),

    // Database errors
    DatabaseConnection(String),
    DatabaseQuery(String),
    DatabaseMigration(String),
    DatabaseConstraint(String),

    // Market data errors
    FeedConnection(String),
    FeedProtocol(String),
    ApiResponse(String),
    ApiTimeout(String),

    // Validation errors
    InvalidParameter(String, String), // (parameter_name, reason)

    // Trading errors
    TradeNotFound(i64),
    TradeClosed(i64, String), // (trade_id, status)
    PortfolioNotFound(i64),
    NoActiveSession,

    // IO errors
    FileNotFound(String),
    FileRead(String),
    FileWrite(String),

    // General errors
    Internal(String),
}

impl TradingError {
    /// Get a user-friendly error message with helpful context
    pub fn user_message(&self) -> String {
        match self {
            TradingError::ConfigNotFound(path) => {
                format!(
                    "Configuration file not found: {}\n\n\
                    💡 Quick fix:\n\
                    1. Run: paper-exchange init\n\
                    2. Edit config.toml (symbol, database path)\n\
                    3. Try again",
                    path
                )
            }
            TradingError::DatabaseConnection(msg) => {
                format!(
                    "Database connection failed: {}\n\n\
                    💡 Try:\n\
                    1. Run: paper-exchange init\n\
                    2. Check data/ directory permissions",
                    msg
                )
            }
            TradingError::PortfolioNotFound(user_id) => {
                format!(
                    "No portfolio for user {}\n\n\
                    💡 Fund a paper account first:\n\
                    paper-exchange portfolio fund --user {} --amount 10000",
                    user_id, user_id
                )
            }
            TradingError::FeedConnection(msg) => {
                format!(
                    "Market data feed unavailable: {}\n\n\
                    💡 Check [market] ws_url and rest_url in config.toml",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradingError::ApiTimeout(_)
                | TradingError::ApiResponse(_)
                | TradingError::FeedConnection(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TradingError::ConfigNotFound(_)
            | TradingError::ConfigParse(_)
            | TradingError::ConfigValidation(_) => "config",

            TradingError::DatabaseConnection(_)
            | TradingError::DatabaseQuery(_)
            | TradingError::DatabaseMigration(_)
            | TradingError::DatabaseConstraint(_) => "database",

            TradingError::FeedConnection(_)
            | TradingError::FeedProtocol(_)
            | TradingError::ApiResponse(_)
            | TradingError::ApiTimeout(_) => "feed",

            TradingError::InvalidParameter(_, _) => "validation",

            TradingError::TradeNotFound(_)
            | TradingError::TradeClosed(_, _)
            | TradingError::PortfolioNotFound(_)
            | TradingError::NoActiveSession => "trading",

            TradingError::FileNotFound(_)
            | TradingError::FileRead(_)
            | TradingError::FileWrite(_) => "io",

            TradingError::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for TradingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path)
            }
            TradingError::ConfigParse(msg) => {
                write!(f, "Configuration parse error: {}", msg)
            }
            TradingError::ConfigValidation(msg) => {
                write!(f, "Configuration validation error: {}", msg)
            }

            TradingError::DatabaseConnection(msg) => {
                write!(f, "Database connection error: {}", msg)
            }
            TradingError::DatabaseQuery(msg) => {
                write!(f, "Database query error: {}", msg)
            }
            TradingError::DatabaseMigration(msg) => {
                write!(f, "Database migration error: {}", msg)
            }
            TradingError::DatabaseConstraint(msg) => {
                write!(f, "Database constraint violation: {}", msg)
            }

            TradingError::FeedConnection(msg) => {
                write!(f, "Feed connection error: {}", msg)
            }
            TradingError::FeedProtocol(msg) => {
                write!(f, "Feed protocol error: {}", msg)
            }
            TradingError::ApiResponse(msg) => {
                write!(f, "API response error: {}", msg)
            }
            TradingError::ApiTimeout(msg) => {
                write!(f, "API timeout: {}", msg)
            }

            TradingError::InvalidParameter(param, reason) => {
                write!(f, "Invalid parameter '{}': {}", param, reason)
            }

            TradingError::TradeNotFound(id) => {
                write!(f, "Trade not found: {}", id)
            }
            TradingError::TradeClosed(id, status) => {
                write!(f, "Trade {} is already {}", id, status)
            }
            TradingError::PortfolioNotFound(user_id) => {
                write!(f, "Portfolio not found for user {}", user_id)
            }
            TradingError::NoActiveSession => {
                write!(f, "No active trading session")
            }

            TradingError::FileNotFound(path) => {
                write!(f, "File not found: {}", path)
            }
            TradingError::FileRead(msg) => {
                write!(f, "File read error: {}", msg)
            }
            TradingError::FileWrite(msg) => {
                write!(f, "File write error: {}", msg)
            }

            TradingError::Internal(msg) => {
                write!(f, "Internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for TradingError {}

// Conversion implementations for common error types

impl From<io::Error> for TradingError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => TradingError::FileNotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => TradingError::FileRead(err.to_string()),
            io::ErrorKind::TimedOut => TradingError::ApiTimeout(err.to_string()),
            io::ErrorKind::ConnectionRefused => TradingError::FeedConnection(err.to_string()),
            _ => TradingError::Internal(format!("IO error: {}", err)),
        }
    }
}

impl From<rusqlite::Error> for TradingError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => {
                if msg.contains("UNIQUE constraint")
                    || msg.contains("FOREIGN KEY constraint")
                    || msg.contains("CHECK constraint")
                {
                    TradingError::DatabaseConstraint(msg)
                } else {
                    TradingError::DatabaseQuery(msg)
                }
            }
            rusqlite::Error::QueryReturnedNoRows => {
                TradingError::DatabaseQuery("Query returned no rows".to_string())
            }
            _ => TradingError::DatabaseQuery(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for TradingError {
    fn from(err: serde_json::Error) -> Self {
        TradingError::FeedProtocol(format!("JSON parse error: {}", err))
    }
}

impl From<toml::de::Error> for TradingError {
    fn from(err: toml::de::Error) -> Self {
        TradingError::ConfigParse(format!("TOML parse error: {}", err))
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TradingError::ApiTimeout(err.to_string())
        } else if err.is_status() {
            TradingError::ApiResponse(err.to_string())
        } else if err.is_decode() {
            TradingError::FeedProtocol(err.to_string())
        } else {
            TradingError::FeedConnection(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TradingError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TradingError::FeedConnection(err.to_string())
    }
}

impl From<rust_decimal::Error> for TradingError {
    fn from(err: rust_decimal::Error) -> Self {
        TradingError::FeedProtocol(format!("Decimal parse error: {}", err))
    }
}

impl From<crate::config::ConfigError> for TradingError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::FileNotFound(path) => TradingError::ConfigNotFound(path),
            ConfigError::FileRead(msg) => TradingError::FileRead(msg),
            ConfigError::FileWrite(msg) => TradingError::FileWrite(msg),
            ConfigError::Parse(msg) => TradingError::ConfigParse(msg),
            ConfigError::Serialize(msg) => TradingError::Internal(msg),
            ConfigError::Validation(msg) => TradingError::ConfigValidation(msg),
        }
    }
}

impl From<String> for TradingError {
    fn from(msg: String) -> Self {
        TradingError::Internal(msg)
    }
}

impl From<&str> for TradingError {
    fn from(msg: &str) -> Self {
        TradingError::Internal(msg.to_string())
    }
}

/// Result type alias using TradingError
pub type TradingResult<T> = Result<T, TradingError>;
