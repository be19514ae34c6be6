//! Database module for SQLite-based trade and portfolio storage

use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{TradingError, TradingResult};

pub mod ledger;
pub mod portfolio;
pub mod trade;

pub use ledger::{Ledger, PortfolioStore, SqliteLedger, TradeStore};
pub use portfolio::Portfolio;
pub use trade::{NewTrade, Trade, TradeFillUpdate, TradeStatus};

/// Database manager sharing one connection behind a mutex
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file
    pub fn new<P: AsRef<Path>>(path: P) -> TradingResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| TradingError::DatabaseConnection(format!("{}: {}", path.display(), e)))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> TradingResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TradingError::DatabaseConnection(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations to set up or update the schema
    pub fn run_migrations(&self) -> TradingResult<()> {
        let conn = self.lock()?;

        let migration_sql = include_str!("migrations/V1__initial_schema.sql");
        conn.execute_batch(migration_sql)
            .map_err(|e| TradingError::DatabaseMigration(e.to_string()))?;

        Ok(())
    }

    /// Get a reference to the connection (for custom queries)
    pub fn get_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run `f` against the connection outside any explicit transaction
    pub fn with_connection<T, F>(&self, f: F) -> TradingResult<T>
    where
        F: FnOnce(&Connection) -> TradingResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction: committed if it returns Ok, rolled back otherwise
    pub fn unit_of_work<T, F>(&self, f: F) -> TradingResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> TradingResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // Dropping an uncommitted transaction rolls it back
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Check database health
    pub fn health_check(&self) -> TradingResult<bool> {
        let conn = self.lock()?;
        let result: i32 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(result == 1)
    }

    fn lock(&self) -> TradingResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TradingError::Internal("database connection lock poisoned".to_string()))
    }
}
