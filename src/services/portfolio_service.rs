//! Portfolio service: owner-checked portfolio CRUD, validated ledger writes and
//! live valuation.
//!
//! Ledger writes and the ledger read of a valuation take a per-portfolio lock,
//! so a valuation never observes a half-applied write. Quotes are fetched
//! outside the lock.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::market_data::MarketDataService;
use super::sqlite_store::SqliteStore;
use super::valuation::{fold_ledger, valuate};
use crate::error::{AppError, Result};
use crate::types::{
    normalize_symbol, LivePrice, NewTransaction, PerformanceHistory, Portfolio, PortfolioInput,
    PortfolioRecord, PortfolioSnapshot, PortfolioView, PositionKey, SnapshotPoint, Transaction,
    TransactionReceipt, WatchlistInput, WatchlistItem,
};

pub const DEFAULT_PORTFOLIO_NAME: &str = "My Portfolio";

pub struct PortfolioService {
    store: Arc<SqliteStore>,
    market: Arc<MarketDataService>,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl PortfolioService {
    pub fn new(store: Arc<SqliteStore>, market: Arc<MarketDataService>) -> Self {
        Self {
            store,
            market,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    fn lock_for(&self, portfolio_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(portfolio_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ========== Portfolios ==========

    /// First portfolio of the user, creating "My Portfolio" when they have none.
    pub fn get_or_create_default(&self, user_id: &str) -> Result<PortfolioRecord> {
        let (record, created) = self
            .store
            .first_or_create_portfolio(user_id, DEFAULT_PORTFOLIO_NAME)?;
        if created {
            info!("Created default portfolio {} for user {}", record.id, user_id);
        }
        Ok(record)
    }

    pub fn create_portfolio(&self, user_id: &str, input: &PortfolioInput) -> Result<PortfolioRecord> {
        let name = validate_name(&input.name)?;
        self.store
            .create_portfolio(user_id, name, input.description.as_deref())
    }

    pub fn list_portfolios(&self, user_id: &str) -> Result<Vec<PortfolioRecord>> {
        self.store.list_portfolios(user_id)
    }

    /// Portfolio owned by `user_id`. Someone else's portfolio reads as not found.
    pub fn owned(&self, user_id: &str, portfolio_id: i64) -> Result<PortfolioRecord> {
        match self.store.get_portfolio(portfolio_id)? {
            Some(record) if record.user_id == user_id => Ok(record),
            _ => Err(AppError::NotFound(format!(
                "Portfolio {} not found",
                portfolio_id
            ))),
        }
    }

    pub fn update_portfolio(
        &self,
        user_id: &str,
        portfolio_id: i64,
        input: &PortfolioInput,
    ) -> Result<PortfolioRecord> {
        self.owned(user_id, portfolio_id)?;
        let name = validate_name(&input.name)?;
        self.store
            .update_portfolio(portfolio_id, name, input.description.as_deref())?
            .ok_or_else(|| AppError::NotFound(format!("Portfolio {} not found", portfolio_id)))
    }

    pub async fn delete_portfolio(&self, user_id: &str, portfolio_id: i64) -> Result<()> {
        self.owned(user_id, portfolio_id)?;
        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;
        self.store.delete_portfolio(portfolio_id)?;
        self.locks.remove(&portfolio_id);
        info!("Deleted portfolio {}", portfolio_id);
        Ok(())
    }

    // ========== Transactions ==========

    pub fn list_transactions(&self, user_id: &str, portfolio_id: i64) -> Result<Vec<Transaction>> {
        self.owned(user_id, portfolio_id)?;
        self.store.list_transactions(portfolio_id)
    }

    /// Validate and record a transaction. A SELL that would oversell is rejected
    /// and nothing is written.
    pub async fn add_transaction(
        &self,
        user_id: &str,
        portfolio_id: i64,
        new: NewTransaction,
    ) -> Result<TransactionReceipt> {
        self.owned(user_id, portfolio_id)?;
        let new = new.validate().map_err(AppError::Validation)?;

        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;
        let receipt = self
            .store
            .insert_transaction(portfolio_id, &new, receipt_for)?;
        debug!(
            "Recorded {} {} x{} in portfolio {}",
            receipt.transaction.side.as_str(),
            receipt.transaction.symbol,
            receipt.transaction.quantity,
            portfolio_id
        );
        Ok(receipt)
    }

    /// Replace a transaction. The whole ledger is re-checked, since an edit can
    /// make a later SELL oversell.
    pub async fn update_transaction(
        &self,
        user_id: &str,
        portfolio_id: i64,
        tx_id: i64,
        new: NewTransaction,
    ) -> Result<TransactionReceipt> {
        self.owned(user_id, portfolio_id)?;
        let new = new.validate().map_err(AppError::Validation)?;

        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;
        self.store
            .update_transaction(portfolio_id, tx_id, &new, receipt_for)
    }

    pub async fn delete_transaction(&self, user_id: &str, portfolio_id: i64, tx_id: i64) -> Result<()> {
        self.owned(user_id, portfolio_id)?;

        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;
        self.store.delete_transaction(portfolio_id, tx_id, |_, ledger| {
            fold_ledger(ledger)?;
            Ok(())
        })
    }

    // ========== Valuation ==========

    /// Value a portfolio against live quotes. Quote failures degrade holdings to
    /// null market fields instead of failing.
    pub async fn value_portfolio(&self, portfolio_id: i64) -> Result<Portfolio> {
        let ledger = {
            let lock = self.lock_for(portfolio_id);
            let _guard = lock.lock().await;
            self.store.list_transactions(portfolio_id)?
        };
        if ledger.is_empty() {
            return Ok(Portfolio::default());
        }

        let folded = fold_ledger(&ledger)?;
        let open: Vec<(PositionKey, String)> = folded
            .open_positions()
            .map(|p| (p.key.clone(), p.quote_symbol.clone()))
            .collect();

        let symbols: Vec<String> = open.iter().map(|(_, s)| s.clone()).collect();
        let quotes = match self.market.fetch_quotes(&symbols).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!("Quotes unavailable for portfolio {}: {}", portfolio_id, e);
                HashMap::new()
            }
        };

        let live_prices: HashMap<PositionKey, LivePrice> = open
            .into_iter()
            .filter_map(|(key, symbol)| {
                quotes.get(&symbol.to_uppercase()).map(|q| {
                    (
                        key,
                        LivePrice {
                            price: q.price,
                            prior_close: q.prior_close,
                        },
                    )
                })
            })
            .collect();

        Ok(valuate(&ledger, &live_prices)?)
    }

    pub async fn view(&self, user_id: &str, portfolio_id: i64) -> Result<PortfolioView> {
        let record = self.owned(user_id, portfolio_id)?;
        let valuation = self.value_portfolio(portfolio_id).await?;
        Ok(PortfolioView { record, valuation })
    }

    pub async fn default_view(&self, user_id: &str) -> Result<PortfolioView> {
        let record = self.get_or_create_default(user_id)?;
        let valuation = self.value_portfolio(record.id).await?;
        Ok(PortfolioView { record, valuation })
    }

    // ========== Snapshots ==========

    /// Value the portfolio now and store it as today's snapshot, overwriting
    /// any earlier one for the same date.
    pub async fn take_snapshot(&self, portfolio_id: i64) -> Result<PortfolioSnapshot> {
        if self.store.get_portfolio(portfolio_id)?.is_none() {
            return Err(AppError::NotFound(format!(
                "Portfolio {} not found",
                portfolio_id
            )));
        }
        let valuation = self.value_portfolio(portfolio_id).await?;
        let snapshot = PortfolioSnapshot {
            portfolio_id,
            date: Utc::now().date_naive(),
            total_market_value: valuation.total_market_value,
            total_cost_basis: valuation.total_cost_basis,
        };
        self.store.upsert_snapshot(&snapshot)?;
        debug!(
            "Snapshot for portfolio {} on {}: {:.2}",
            portfolio_id, snapshot.date, snapshot.total_market_value
        );
        Ok(snapshot)
    }

    pub fn performance_history(
        &self,
        user_id: &str,
        portfolio_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<PerformanceHistory> {
        self.owned(user_id, portfolio_id)?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(AppError::BadRequest(
                    "start date must not be after end date".to_string(),
                ));
            }
        }
        let performance_history = self
            .store
            .snapshots_between(portfolio_id, start, end)?
            .into_iter()
            .map(|s| SnapshotPoint {
                date: s.date,
                total_market_value: s.total_market_value,
                total_cost_basis: s.total_cost_basis,
            })
            .collect();
        Ok(PerformanceHistory {
            portfolio_id,
            performance_history,
        })
    }

    // ========== Watchlist ==========

    pub fn watchlist(&self, user_id: &str) -> Result<Vec<WatchlistItem>> {
        self.store.list_watchlist(user_id)
    }

    pub fn add_to_watchlist(&self, user_id: &str, input: &WatchlistInput) -> Result<WatchlistItem> {
        let symbol = normalize_symbol(&input.symbol)
            .ok_or_else(|| AppError::Validation(format!("Invalid symbol '{}'", input.symbol)))?;
        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&symbol)
            .to_string();
        self.store
            .add_watchlist(user_id, &symbol, &name)?
            .ok_or_else(|| AppError::Conflict(format!("{} is already on the watchlist", symbol)))
    }

    pub fn remove_from_watchlist(&self, user_id: &str, symbol: &str) -> Result<()> {
        let symbol = symbol.trim().to_uppercase();
        if self.store.remove_watchlist(user_id, &symbol)? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("{} is not on the watchlist", symbol)))
        }
    }
}

/// Ledger check shared by insert and update: the whole ledger must fold, and
/// the receipt carries the realized result of the written row.
fn receipt_for(tx_id: i64, ledger: &[Transaction]) -> Result<TransactionReceipt> {
    let folded = fold_ledger(ledger)?;
    let transaction = ledger
        .iter()
        .find(|t| t.id == tx_id)
        .cloned()
        .ok_or_else(|| AppError::Internal(format!("transaction {} missing after write", tx_id)))?;
    Ok(TransactionReceipt {
        realized_gain_loss: folded.realized.get(&tx_id).copied(),
        transaction,
    })
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(AppError::Validation(
            "Portfolio name must be 1-100 characters".to_string(),
        ));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Retirement ").unwrap(), "Retirement");
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(101)).is_err());
    }
}
