// Settlement Applier
// Applies the financial effect of a fill to the user's paper portfolio.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::db::{Portfolio, PortfolioStore};
use crate::types::Side;

/// One executed quantity at one price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub side: Side,
    pub amount: Decimal,
    pub price: Decimal,
}

/// Portfolio after applying `fill`
///
/// Bid fills add coins and spend funds; ask fills do the inverse. Any field
/// whose arithmetic overflows is written as zero, and absent prior fields
/// count as zero.
pub fn settle(portfolio: &Portfolio, fill: &Fill) -> Portfolio {
    let sign = fill.side.rules().coin_sign;
    let value = fill.amount.checked_mul(fill.price);

    let coin_delta = fill.amount.checked_mul(sign);
    let cash_delta = value.and_then(|v| v.checked_mul(sign));

    let btccoins = coin_delta
        .and_then(|delta| portfolio.coins().checked_add(delta))
        .unwrap_or(Decimal::ZERO);
    let available_funds = cash_delta
        .and_then(|delta| portfolio.funds().checked_sub(delta))
        .unwrap_or(Decimal::ZERO);
    let total_invested = cash_delta
        .and_then(|delta| portfolio.invested().checked_add(delta))
        .unwrap_or(Decimal::ZERO);
    let total_balance = btccoins
        .checked_mul(fill.price)
        .and_then(|held| held.checked_add(available_funds))
        .unwrap_or(Decimal::ZERO);

    Portfolio {
        user_id: portfolio.user_id,
        available_funds: Some(available_funds),
        btccoins: Some(btccoins),
        total_invested: Some(total_invested),
        total_balance: Some(total_balance),
        last_updated: Some(chrono::Utc::now().to_rfc3339()),
    }
}

/// Applies fills through a portfolio store, one read-modify-write per fill
pub struct SettlementApplier<'a, S: PortfolioStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: PortfolioStore + ?Sized> SettlementApplier<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Settle one fill for `user_id`. Failures are logged and reported as `false`.
    pub fn apply(&self, user_id: i64, fill: &Fill) -> bool {
        let portfolio = match self.store.get_by_user_id(user_id) {
            Ok(Some(portfolio)) => portfolio,
            Ok(None) => {
                warn!("⚠️  No portfolio for user {}, settlement skipped", user_id);
                return false;
            }
            Err(e) => {
                error!("❌ Failed to load portfolio for user {}: {}", user_id, e);
                return false;
            }
        };

        let updated = settle(&portfolio, fill);
        match self.store.update(user_id, &updated) {
            Ok(()) => {
                debug!(
                    "Settled {} {} @ {} for user {}: funds={} coins={}",
                    fill.side,
                    fill.amount,
                    fill.price,
                    user_id,
                    updated.funds(),
                    updated.coins()
                );
                true
            }
            Err(e) => {
                error!("❌ Failed to persist portfolio for user {}: {}", user_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn portfolio(funds: &str, coins: &str) -> Portfolio {
        Portfolio {
            user_id: 1,
            available_funds: Some(d(funds)),
            btccoins: Some(d(coins)),
            total_invested: Some(Decimal::ZERO),
            total_balance: None,
            last_updated: None,
        }
    }

    #[test]
    fn test_bid_fill_buys_coins() {
        let after = settle(
            &portfolio("1000", "0"),
            &Fill { side: Side::Bid, amount: d("1"), price: d("99.5") },
        );
        assert_eq!(after.coins(), d("1"));
        assert_eq!(after.funds(), d("900.5"));
        assert_eq!(after.invested(), d("99.5"));
        assert_eq!(after.total_balance, Some(d("1000.0")));
        assert!(after.last_updated.is_some());
    }

    #[test]
    fn test_ask_fill_is_exact_inverse() {
        let fill_bid = Fill { side: Side::Bid, amount: d("0.25"), price: d("40000") };
        let fill_ask = Fill { side: Side::Ask, ..fill_bid };

        let start = portfolio("20000", "2");
        let round_trip = settle(&settle(&start, &fill_bid), &fill_ask);
        assert_eq!(round_trip.funds(), start.funds());
        assert_eq!(round_trip.coins(), start.coins());
        assert_eq!(round_trip.invested(), Decimal::ZERO);

        let sold = settle(&start, &fill_ask);
        assert_eq!(sold.coins(), d("1.75"));
        assert_eq!(sold.funds(), d("30000"));
    }

    #[test]
    fn test_missing_fields_count_as_zero() {
        let empty = Portfolio {
            user_id: 5,
            available_funds: None,
            btccoins: None,
            total_invested: None,
            total_balance: None,
            last_updated: None,
        };
        let after = settle(&empty, &Fill { side: Side::Bid, amount: d("2"), price: d("10") });
        assert_eq!(after.coins(), d("2"));
        assert_eq!(after.funds(), d("-20"));
        assert_eq!(after.total_balance, Some(d("0")));
    }

    #[test]
    fn test_overflow_coerces_to_zero() {
        let after = settle(
            &portfolio("1", "0"),
            &Fill { side: Side::Bid, amount: Decimal::MAX, price: d("10") },
        );
        assert_eq!(after.funds(), Decimal::ZERO);
        assert_eq!(after.invested(), Decimal::ZERO);
        assert_eq!(after.coins(), Decimal::MAX);
        assert_eq!(after.total_balance, Some(Decimal::ZERO));
    }
}
