use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::transaction::{OptionType, Transaction};

/// A user-owned portfolio row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating or updating a portfolio.
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Live price and previous close for one position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivePrice {
    pub price: f64,
    pub prior_close: Option<f64>,
}

/// Derived position, recomputed on every valuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    /// Display form of the position key, e.g. `AAPL` or `AAPL 01/17/25 150C`.
    pub position_key: String,
    /// Symbol quotes are looked up under (contract symbol for options).
    pub symbol: String,
    pub quantity: f64,
    pub average_cost_basis: f64,
    pub total_cost_basis: f64,
    pub current_price: Option<f64>,
    pub market_value: Option<f64>,
    pub unrealized_gain_loss: Option<f64>,
    pub unrealized_gain_loss_percent: Option<f64>,
    pub todays_change: Option<f64>,
    pub todays_change_percent: Option<f64>,
    pub is_option: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_type: Option<OptionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strike_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underlying_symbol: Option<String>,
}

/// Valuation result: holdings plus aggregate totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    pub holdings: Vec<Holding>,
    pub total_market_value: f64,
    pub total_cost_basis: f64,
    pub total_unrealized_gain_loss: f64,
    pub total_unrealized_gain_loss_percent: Option<f64>,
    pub total_todays_change: f64,
}

/// Portfolio record combined with its current valuation.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioView {
    #[serde(flatten)]
    pub record: PortfolioRecord,
    #[serde(flatten)]
    pub valuation: Portfolio,
}

/// Response to a transaction write.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionReceipt {
    pub transaction: Transaction,
    /// Realized gain or loss for a SELL, measured against the average cost at sale time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_gain_loss: Option<f64>,
}

/// Daily stored valuation of a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub portfolio_id: i64,
    pub date: NaiveDate,
    pub total_market_value: f64,
    pub total_cost_basis: f64,
}

/// One point of the performance chart.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotPoint {
    pub date: NaiveDate,
    pub total_market_value: f64,
    pub total_cost_basis: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceHistory {
    pub portfolio_id: i64,
    pub performance_history: Vec<SnapshotPoint>,
}

/// A symbol on a user's watchlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub id: i64,
    pub user_id: String,
    pub symbol: String,
    pub name: String,
    pub added_at: DateTime<Utc>,
}

/// Request body for adding a watchlist symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistInput {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
}
