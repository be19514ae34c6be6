//! Portfolio database operations

use rusqlite::{params, Connection, Result as SqlResult, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::trade::{now_timestamp, optional_decimal_column};

/// Paper balances for one user
///
/// Balance fields are optional because rows may predate a column being set;
/// settlement treats an absent value as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: i64,
    pub available_funds: Option<Decimal>,
    pub btccoins: Option<Decimal>,
    pub total_invested: Option<Decimal>,
    pub total_balance: Option<Decimal>,
    pub last_updated: Option<String>,
}

impl Portfolio {
    /// Fresh account holding only quote funds
    pub fn funded(user_id: i64, funds: Decimal) -> Self {
        Portfolio {
            user_id,
            available_funds: Some(funds),
            btccoins: Some(Decimal::ZERO),
            total_invested: Some(Decimal::ZERO),
            total_balance: Some(funds),
            last_updated: Some(now_timestamp()),
        }
    }

    pub fn funds(&self) -> Decimal {
        self.available_funds.unwrap_or_default()
    }

    pub fn coins(&self) -> Decimal {
        self.btccoins.unwrap_or_default()
    }

    pub fn invested(&self) -> Decimal {
        self.total_invested.unwrap_or_default()
    }

    /// Balance valued at `price`
    pub fn valued_at(&self, price: Decimal) -> Option<Decimal> {
        self.coins()
            .checked_mul(price)
            .and_then(|value| value.checked_add(self.funds()))
    }

    fn from_row(row: &Row) -> SqlResult<Self> {
        Ok(Portfolio {
            user_id: row.get(0)?,
            available_funds: optional_decimal_column(row, 1)?,
            btccoins: optional_decimal_column(row, 2)?,
            total_invested: optional_decimal_column(row, 3)?,
            total_balance: optional_decimal_column(row, 4)?,
            last_updated: row.get(5)?,
        })
    }

    pub fn find_by_user(conn: &Connection, user_id: i64) -> SqlResult<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, available_funds, btccoins, total_invested, total_balance, last_updated
             FROM portfolios WHERE user_id = ?1",
        )?;

        let mut rows = stmt.query(params![user_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn insert(&self, conn: &Connection) -> SqlResult<()> {
        conn.execute(
            "INSERT INTO portfolios (
                user_id, available_funds, btccoins, total_invested, total_balance, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.user_id,
                self.available_funds.map(|v| v.to_string()),
                self.btccoins.map(|v| v.to_string()),
                self.total_invested.map(|v| v.to_string()),
                self.total_balance.map(|v| v.to_string()),
                self.last_updated,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the stored balances; returns rows affected
    pub fn update(&self, conn: &Connection, user_id: i64) -> SqlResult<usize> {
        conn.execute(
            "UPDATE portfolios SET
                available_funds = ?1, btccoins = ?2, total_invested = ?3,
                total_balance = ?4, last_updated = ?5
             WHERE user_id = ?6",
            params![
                self.available_funds.map(|v| v.to_string()),
                self.btccoins.map(|v| v.to_string()),
                self.total_invested.map(|v| v.to_string()),
                self.total_balance.map(|v| v.to_string()),
                self.last_updated,
                user_id,
            ],
        )
    }
}
