// Common types used across the application

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TradingError;

/// Default number of levels shown per side of the book
pub const DEFAULT_BOOK_DEPTH: usize = 20;
pub const DEFAULT_SYMBOL: &str = "BTCUSDT";

/// Side of an order or of a book level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid, // user buys
    Ask, // user sells
}

/// Everything that differs between the two sides of the book
pub struct SideRules {
    /// Storage/wire label
    pub label: &'static str,
    /// Sign applied to coin holdings when a fill on this side settles
    pub coin_sign: Decimal,
    /// Ordering that puts the best price of this side first
    pub best_first: fn(&Decimal, &Decimal) -> Ordering,
    /// Whether a virtual order on this side at `own` executes against a real level at `real`
    pub crosses: fn(own: &Decimal, real: &Decimal) -> bool,
    pub opposite: Side,
}

fn descending(a: &Decimal, b: &Decimal) -> Ordering {
    b.cmp(a)
}

fn ascending(a: &Decimal, b: &Decimal) -> Ordering {
    a.cmp(b)
}

fn at_or_above(own: &Decimal, real: &Decimal) -> bool {
    own >= real
}

fn at_or_below(own: &Decimal, real: &Decimal) -> bool {
    own <= real
}

const BID_RULES: SideRules = SideRules {
    label: "bid",
    coin_sign: Decimal::ONE,
    best_first: descending,
    crosses: at_or_above,
    opposite: Side::Ask,
};

const ASK_RULES: SideRules = SideRules {
    label: "ask",
    coin_sign: Decimal::NEGATIVE_ONE,
    best_first: ascending,
    crosses: at_or_below,
    opposite: Side::Bid,
};

impl Side {
    pub const ALL: [Side; 2] = [Side::Bid, Side::Ask];

    pub fn rules(self) -> &'static SideRules {
        match self {
            Side::Bid => &BID_RULES,
            Side::Ask => &ASK_RULES,
        }
    }

    pub fn opposite(self) -> Side {
        self.rules().opposite
    }

    pub fn as_str(self) -> &'static str {
        self.rules().label
    }

    /// Compare two prices so that the better one for this side sorts first
    pub fn best_first(self, a: &Decimal, b: &Decimal) -> Ordering {
        (self.rules().best_first)(a, b)
    }

    pub fn crosses(self, own_price: &Decimal, real_price: &Decimal) -> bool {
        (self.rules().crosses)(own_price, real_price)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bid" | "bids" | "buy" => Ok(Side::Bid),
            "ask" | "asks" | "sell" => Ok(Side::Ask),
            other => Err(TradingError::InvalidParameter(
                "side".to_string(),
                format!("expected bid or ask, got '{}'", other),
            )),
        }
    }
}

/// A single price level: price and resting quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Parse a user-supplied decimal, rejecting non-numeric and non-positive input
pub fn parse_positive_decimal(name: &str, raw: &str) -> Result<Decimal, TradingError> {
    let value = Decimal::from_str(raw.trim()).map_err(|e| {
        TradingError::InvalidParameter(name.to_string(), format!("'{}' is not a number: {}", raw, e))
    })?;
    if value <= Decimal::ZERO {
        return Err(TradingError::InvalidParameter(
            name.to_string(),
            format!("must be positive, got {}", value),
        ));
    }
    Ok(value)
}
