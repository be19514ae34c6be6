//! Trade database operations

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Result as SqlResult, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Side;

const TRADE_COLUMNS: &str =
    "id, user_id, trade_type, price, amount, filled_amount, status, created_at, updated_at";

/// A persisted paper order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub user_id: i64,
    pub trade_type: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub filled_amount: Decimal,
    pub status: TradeStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl TradeStatus {
    pub fn to_string(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::PartiallyFilled => "partially_filled",
            TradeStatus::Filled => "filled",
            TradeStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "open" => Some(TradeStatus::Open),
            "partially_filled" => Some(TradeStatus::PartiallyFilled),
            "filled" => Some(TradeStatus::Filled),
            "cancelled" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }

    /// Status implied by how much of `amount` has been filled
    pub fn derive(filled_amount: Decimal, amount: Decimal) -> Self {
        if filled_amount >= amount {
            TradeStatus::Filled
        } else if filled_amount > Decimal::ZERO {
            TradeStatus::PartiallyFilled
        } else {
            TradeStatus::Open
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Filled | TradeStatus::Cancelled)
    }
}

/// Order placement request
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub user_id: i64,
    pub trade_type: Side,
    pub price: Decimal,
    pub amount: Decimal,
}

/// New fill state for one trade
#[derive(Debug, Clone, PartialEq)]
pub struct TradeFillUpdate {
    pub id: i64,
    pub filled_amount: Decimal,
    pub status: TradeStatus,
}

impl Trade {
    /// Amount still resting on the book
    pub fn remaining(&self) -> Decimal {
        (self.amount - self.filled_amount).max(Decimal::ZERO)
    }

    /// Whether the trade still rests on the book with something left to fill
    pub fn is_active(&self) -> bool {
        matches!(self.status, TradeStatus::Open | TradeStatus::PartiallyFilled)
            && self.remaining() > Decimal::ZERO
    }

    /// Parse a row from the database
    fn from_row(row: &Row) -> SqlResult<Self> {
        let trade_type: String = row.get(2)?;
        let status: String = row.get(6)?;

        Ok(Trade {
            id: row.get(0)?,
            user_id: row.get(1)?,
            trade_type: Side::from_str(&trade_type)
                .map_err(|e| conversion_error(2, e.to_string()))?,
            price: decimal_column(row, 3)?,
            amount: decimal_column(row, 4)?,
            filled_amount: decimal_column(row, 5)?,
            status: TradeStatus::from_string(&status)
                .ok_or_else(|| conversion_error(6, format!("unknown trade status '{}'", status)))?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    /// Insert a new open trade
    pub fn insert(conn: &Connection, new_trade: &NewTrade) -> SqlResult<i64> {
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO trades (
                user_id, trade_type, price, amount, filled_amount, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, '0', ?5, ?6, ?6)",
            params![
                new_trade.user_id,
                new_trade.trade_type.as_str(),
                new_trade.price.to_string(),
                new_trade.amount.to_string(),
                TradeStatus::Open.to_string(),
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Find trade by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> SqlResult<Option<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM trades WHERE id = ?1", TRADE_COLUMNS))?;

        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Find all trades whose id is in `ids`; missing ids are simply absent
    pub fn find_by_ids(conn: &Connection, ids: &[i64]) -> SqlResult<Vec<Self>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM trades WHERE id IN ({}) ORDER BY id",
            TRADE_COLUMNS, placeholders
        ))?;

        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| Self::from_row(row))?;
        rows.collect()
    }

    /// List trades for a user, newest first
    pub fn list_by_user(conn: &Connection, user_id: i64) -> SqlResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM trades WHERE user_id = ?1 ORDER BY id DESC",
            TRADE_COLUMNS
        ))?;

        let rows = stmt.query_map(params![user_id], |row| Self::from_row(row))?;
        rows.collect()
    }

    /// Persist new fill state
    pub fn apply_fill(conn: &Connection, update: &TradeFillUpdate) -> SqlResult<usize> {
        conn.execute(
            "UPDATE trades SET filled_amount = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                update.filled_amount.to_string(),
                update.status.to_string(),
                now_timestamp(),
                update.id,
            ],
        )
    }

    /// Persist new fill state only while the trade is still open or partially filled
    pub fn apply_fill_if_active(conn: &Connection, update: &TradeFillUpdate) -> SqlResult<usize> {
        conn.execute(
            "UPDATE trades SET filled_amount = ?1, status = ?2, updated_at = ?3
             WHERE id = ?4 AND status IN ('open', 'partially_filled')",
            params![
                update.filled_amount.to_string(),
                update.status.to_string(),
                now_timestamp(),
                update.id,
            ],
        )
    }

    /// Update trade status
    pub fn update_status(conn: &Connection, id: i64, status: TradeStatus) -> SqlResult<usize> {
        conn.execute(
            "UPDATE trades SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), now_timestamp(), id],
        )
    }
}

pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Read a TEXT column holding a decimal
pub(crate) fn decimal_column(row: &Row, idx: usize) -> SqlResult<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

/// Read a nullable decimal column, treating NULL as absent
pub(crate) fn optional_decimal_column(row: &Row, idx: usize) -> SqlResult<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| Decimal::from_str(&value).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn setup() -> Database {
        let db = Database::new_in_memory().unwrap();
        db.run_migrations().unwrap();
        db
    }

    #[test]
    fn test_trade_crud() {
        let db = setup();
        db.with_connection(|conn| {
            let id = Trade::insert(
                conn,
                &NewTrade { user_id: 7, trade_type: Side::Bid, price: d("101.0"), amount: d("1.5") },
            )?;

            let loaded = Trade::find_by_id(conn, id)?.unwrap();
            assert_eq!(loaded.trade_type, Side::Bid);
            assert_eq!(loaded.price, d("101.0"));
            assert_eq!(loaded.filled_amount, Decimal::ZERO);
            assert_eq!(loaded.status, TradeStatus::Open);
            assert!(loaded.is_active());

            Trade::apply_fill(
                conn,
                &TradeFillUpdate { id, filled_amount: d("0.5"), status: TradeStatus::PartiallyFilled },
            )?;
            let loaded = Trade::find_by_id(conn, id)?.unwrap();
            assert_eq!(loaded.remaining(), d("1.0"));
            assert_eq!(loaded.status, TradeStatus::PartiallyFilled);

            assert_eq!(Trade::list_by_user(conn, 7)?.len(), 1);
            assert!(Trade::list_by_user(conn, 8)?.is_empty());
            assert!(Trade::find_by_id(conn, id + 100)?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_by_ids_skips_missing() {
        let db = setup();
        db.with_connection(|conn| {
            let a = Trade::insert(
                conn,
                &NewTrade { user_id: 1, trade_type: Side::Ask, price: d("99"), amount: d("2") },
            )?;
            let b = Trade::insert(
                conn,
                &NewTrade { user_id: 1, trade_type: Side::Bid, price: d("98"), amount: d("1") },
            )?;

            let found = Trade::find_by_ids(conn, &[b, a, 999])?;
            assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a, b]);
            assert!(Trade::find_by_ids(conn, &[])?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(TradeStatus::derive(d("0"), d("1")), TradeStatus::Open);
        assert_eq!(TradeStatus::derive(d("0.4"), d("1")), TradeStatus::PartiallyFilled);
        assert_eq!(TradeStatus::derive(d("1"), d("1")), TradeStatus::Filled);
        assert!(TradeStatus::Cancelled.is_terminal());
        assert!(!TradeStatus::PartiallyFilled.is_terminal());
        assert_eq!(TradeStatus::from_string("partially_filled"), Some(TradeStatus::PartiallyFilled));
        assert_eq!(TradeStatus::from_string("PENDING"), None);
    }
}
