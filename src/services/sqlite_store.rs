//! SQLite persistence for portfolios, the transaction ledger, daily snapshots
//! and watchlists.
//!
//! Ledger writes run inside an immediate transaction: the row is written, the
//! full ledger re-read and checked, and the write is rolled back when the check
//! fails. The check therefore sees a consistent snapshot even when another
//! process shares the database file.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::types::{
    NewTransaction, OptionType, PortfolioRecord, PortfolioSnapshot, Transaction, TransactionSide,
    WatchlistItem,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

const TRANSACTION_COLUMNS: &str = "id, portfolio_id, symbol, side, quantity, price, transaction_date,
     is_option, option_type, strike_price, expiration_date, underlying_symbol, created_at";

/// SQLite store for the portfolio ledger.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, format!("bad date '{}': {}", raw, e)))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| conversion_error(idx, format!("bad timestamp {}", millis)))
}

fn date_str(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let side: String = row.get(3)?;
    let option_type: Option<String> = row.get(8)?;
    let expiration: Option<String> = row.get(10)?;

    Ok(Transaction {
        id: row.get(0)?,
        portfolio_id: row.get(1)?,
        symbol: row.get(2)?,
        side: TransactionSide::parse(&side)
            .ok_or_else(|| conversion_error(3, format!("bad side '{}'", side)))?,
        quantity: row.get(4)?,
        price: row.get(5)?,
        transaction_date: parse_date(row, 6)?,
        is_option: row.get(7)?,
        option_type: option_type.as_deref().and_then(OptionType::parse),
        strike_price: row.get(9)?,
        expiration_date: expiration
            .map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT))
            .transpose()
            .map_err(|e| conversion_error(10, e.to_string()))?,
        underlying_symbol: row.get(11)?,
        created_at: parse_timestamp(row, 12)?,
    })
}

fn row_to_portfolio(row: &Row<'_>) -> rusqlite::Result<PortfolioRecord> {
    Ok(PortfolioRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        updated_at: parse_timestamp(row, 5)?,
    })
}

fn load_transactions(conn: &Connection, portfolio_id: i64) -> rusqlite::Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions WHERE portfolio_id = ?1
         ORDER BY transaction_date ASC, id ASC",
        TRANSACTION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![portfolio_id], row_to_transaction)?;
    rows.collect()
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock()?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS portfolios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_portfolios_user ON portfolios(user_id);

            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                portfolio_id INTEGER NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
                quantity REAL NOT NULL CHECK (quantity > 0),
                price REAL NOT NULL CHECK (price > 0),
                transaction_date TEXT NOT NULL,
                is_option INTEGER NOT NULL DEFAULT 0,
                option_type TEXT,
                strike_price REAL,
                expiration_date TEXT,
                underlying_symbol TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_portfolio
                ON transactions(portfolio_id, transaction_date, id);

            CREATE TABLE IF NOT EXISTS portfolio_snapshots (
                portfolio_id INTEGER NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
                date TEXT NOT NULL,
                total_market_value REAL NOT NULL,
                total_cost_basis REAL NOT NULL,
                PRIMARY KEY (portfolio_id, date)
            );

            CREATE TABLE IF NOT EXISTS watchlist_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                name TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                UNIQUE (user_id, symbol)
            );",
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Portfolio Methods ==========

    pub fn create_portfolio(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<PortfolioRecord> {
        let conn = self.conn.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO portfolios (user_id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![user_id, name, description, now.timestamp_millis()],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Created portfolio {} for user {}", id, user_id);

        conn.query_row(
            "SELECT id, user_id, name, description, created_at, updated_at
             FROM portfolios WHERE id = ?1",
            params![id],
            row_to_portfolio,
        )
        .map_err(AppError::from)
    }

    /// Oldest portfolio of `user_id`, inserting one named `name` when they have
    /// none. The lookup and the insert share one immediate transaction.
    pub fn first_or_create_portfolio(&self, user_id: &str, name: &str) -> Result<(PortfolioRecord, bool)> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = tx
            .query_row(
                "SELECT id, user_id, name, description, created_at, updated_at
                 FROM portfolios WHERE user_id = ?1 ORDER BY id ASC LIMIT 1",
                params![user_id],
                row_to_portfolio,
            )
            .optional()?;
        if let Some(record) = existing {
            return Ok((record, false));
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO portfolios (user_id, name, description, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?3)",
            params![user_id, name, now.timestamp_millis()],
        )?;
        let id = tx.last_insert_rowid();
        let record = tx.query_row(
            "SELECT id, user_id, name, description, created_at, updated_at
             FROM portfolios WHERE id = ?1",
            params![id],
            row_to_portfolio,
        )?;
        tx.commit()?;
        debug!("Created portfolio {} for user {}", id, user_id);
        Ok((record, true))
    }

    pub fn get_portfolio(&self, id: i64) -> Result<Option<PortfolioRecord>> {
        let conn = self.conn.lock()?;
        conn.query_row(
            "SELECT id, user_id, name, description, created_at, updated_at
             FROM portfolios WHERE id = ?1",
            params![id],
            row_to_portfolio,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_portfolios(&self, user_id: &str) -> Result<Vec<PortfolioRecord>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, description, created_at, updated_at
             FROM portfolios WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_portfolio)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Ids of every portfolio, for the snapshot fan-out.
    pub fn all_portfolio_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM portfolios ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
    }

    pub fn update_portfolio(
        &self,
        id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Option<PortfolioRecord>> {
        {
            let conn = self.conn.lock()?;
            let changed = conn.execute(
                "UPDATE portfolios SET name = ?2, description = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, name, description, Utc::now().timestamp_millis()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
        }
        self.get_portfolio(id)
    }

    /// Delete a portfolio with its transactions and snapshots.
    pub fn delete_portfolio(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock()?;
        let changed = conn.execute("DELETE FROM portfolios WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ========== Transaction Methods ==========

    /// Ledger in fold order (date, then insertion order).
    pub fn list_transactions(&self, portfolio_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock()?;
        Ok(load_transactions(&conn, portfolio_id)?)
    }

    pub fn get_transaction(&self, portfolio_id: i64, tx_id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM transactions WHERE portfolio_id = ?1 AND id = ?2",
                TRANSACTION_COLUMNS
            ),
            params![portfolio_id, tx_id],
            row_to_transaction,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Run `write`, re-read the ledger and commit only if `check` accepts it.
    fn checked_write<T>(
        &self,
        portfolio_id: i64,
        write: impl FnOnce(&Connection) -> Result<i64>,
        check: impl FnOnce(i64, &[Transaction]) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let affected = write(&tx)?;
        let ledger = load_transactions(&tx, portfolio_id)?;
        let out = check(affected, &ledger)?;
        tx.commit()?;
        Ok(out)
    }

    /// Insert a validated transaction. `check` receives the new row id and the
    /// resulting ledger; an error rolls the insert back.
    pub fn insert_transaction<T>(
        &self,
        portfolio_id: i64,
        new: &NewTransaction,
        check: impl FnOnce(i64, &[Transaction]) -> Result<T>,
    ) -> Result<T> {
        self.checked_write(
            portfolio_id,
            |conn| {
                conn.execute(
                    "INSERT INTO transactions (portfolio_id, symbol, side, quantity, price,
                        transaction_date, is_option, option_type, strike_price, expiration_date,
                        underlying_symbol, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        portfolio_id,
                        new.symbol,
                        new.side.as_str(),
                        new.quantity,
                        new.price,
                        date_str(new.transaction_date),
                        new.is_option,
                        new.option_type.map(|t| t.as_str()),
                        new.strike_price,
                        new.expiration_date.map(date_str),
                        new.underlying_symbol,
                        Utc::now().timestamp_millis(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            },
            check,
        )
    }

    /// Replace the fields of an existing transaction, keeping its id and creation time.
    pub fn update_transaction<T>(
        &self,
        portfolio_id: i64,
        tx_id: i64,
        new: &NewTransaction,
        check: impl FnOnce(i64, &[Transaction]) -> Result<T>,
    ) -> Result<T> {
        self.checked_write(
            portfolio_id,
            |conn| {
                let changed = conn.execute(
                    "UPDATE transactions SET symbol = ?3, side = ?4, quantity = ?5, price = ?6,
                        transaction_date = ?7, is_option = ?8, option_type = ?9,
                        strike_price = ?10, expiration_date = ?11, underlying_symbol = ?12
                     WHERE portfolio_id = ?1 AND id = ?2",
                    params![
                        portfolio_id,
                        tx_id,
                        new.symbol,
                        new.side.as_str(),
                        new.quantity,
                        new.price,
                        date_str(new.transaction_date),
                        new.is_option,
                        new.option_type.map(|t| t.as_str()),
                        new.strike_price,
                        new.expiration_date.map(date_str),
                        new.underlying_symbol,
                    ],
                )?;
                if changed == 0 {
                    return Err(AppError::NotFound(format!("Transaction {} not found", tx_id)));
                }
                Ok(tx_id)
            },
            check,
        )
    }

    pub fn delete_transaction<T>(
        &self,
        portfolio_id: i64,
        tx_id: i64,
        check: impl FnOnce(i64, &[Transaction]) -> Result<T>,
    ) -> Result<T> {
        self.checked_write(
            portfolio_id,
            |conn| {
                let changed = conn.execute(
                    "DELETE FROM transactions WHERE portfolio_id = ?1 AND id = ?2",
                    params![portfolio_id, tx_id],
                )?;
                if changed == 0 {
                    return Err(AppError::NotFound(format!("Transaction {} not found", tx_id)));
                }
                Ok(tx_id)
            },
            check,
        )
    }

    // ========== Snapshot Methods ==========

    /// Insert or overwrite the snapshot for its date.
    pub fn upsert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO portfolio_snapshots (portfolio_id, date, total_market_value, total_cost_basis)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(portfolio_id, date) DO UPDATE SET
                total_market_value = excluded.total_market_value,
                total_cost_basis = excluded.total_cost_basis",
            params![
                snapshot.portfolio_id,
                date_str(snapshot.date),
                snapshot.total_market_value,
                snapshot.total_cost_basis,
            ],
        )?;
        Ok(())
    }

    /// Snapshots in `[start, end]`, oldest first. Open bounds when `None`.
    pub fn snapshots_between(
        &self,
        portfolio_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<PortfolioSnapshot>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT portfolio_id, date, total_market_value, total_cost_basis
             FROM portfolio_snapshots
             WHERE portfolio_id = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date ASC",
        )?;
        let rows = stmt.query_map(
            params![portfolio_id, start.map(date_str), end.map(date_str)],
            |row| {
                Ok(PortfolioSnapshot {
                    portfolio_id: row.get(0)?,
                    date: parse_date(row, 1)?,
                    total_market_value: row.get(2)?,
                    total_cost_basis: row.get(3)?,
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ========== Watchlist Methods ==========

    pub fn list_watchlist(&self, user_id: &str) -> Result<Vec<WatchlistItem>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, symbol, name, added_at FROM watchlist_items
             WHERE user_id = ?1 ORDER BY added_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(WatchlistItem {
                id: row.get(0)?,
                user_id: row.get(1)?,
                symbol: row.get(2)?,
                name: row.get(3)?,
                added_at: parse_timestamp(row, 4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Add a symbol. Returns `None` when it is already on the list.
    pub fn add_watchlist(&self, user_id: &str, symbol: &str, name: &str) -> Result<Option<WatchlistItem>> {
        let conn = self.conn.lock()?;
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT INTO watchlist_items (user_id, symbol, name, added_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, symbol) DO NOTHING",
            params![user_id, symbol, name, now.timestamp_millis()],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(WatchlistItem {
            id: conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            added_at: now,
        }))
    }

    pub fn remove_watchlist(&self, user_id: &str, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock()?;
        let changed = conn.execute(
            "DELETE FROM watchlist_items WHERE user_id = ?1 AND symbol = ?2",
            params![user_id, symbol],
        )?;
        Ok(changed > 0)
    }
}
