//! External data sources.

pub mod openrouter;
pub mod yahoo;

pub use openrouter::{ChatTransport, OpenRouterClient, TransportError};
pub use yahoo::YahooFinanceClient;

use chrono::NaiveDate;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{NewsArticle, OhlcvBar, OptionChain, Quote, QuoteSummary, SearchResponse};

/// Market data provider failures.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The provider does not know the symbol (or has no data for it).
    #[error("Symbol not found: {0}")]
    NotFound(String),

    #[error("Provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    Parse(String),
}

impl SourceError {
    /// Timeouts, connection failures, 5xx and 429 are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http { status, .. } => *status == 429 || *status >= 500,
            SourceError::Request(e) => e.is_timeout() || e.is_connect(),
            SourceError::NotFound(_) | SourceError::Parse(_) => false,
        }
    }
}

/// Quote, history, option and search provider.
///
/// Implementations normalize NaN and missing numeric fields to `None` before
/// returning.
pub trait MarketDataProvider: Send + Sync {
    /// Chronologically ordered bars for `period` at `interval` granularity.
    fn history<'a>(
        &'a self,
        symbol: &'a str,
        period: &'a str,
        interval: &'a str,
    ) -> BoxFuture<'a, Result<Vec<OhlcvBar>, SourceError>>;

    /// Latest price and previous close per symbol. Unknown symbols are omitted.
    fn quotes<'a>(
        &'a self,
        symbols: &'a [String],
    ) -> BoxFuture<'a, Result<HashMap<String, Quote>, SourceError>>;

    fn summary<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<QuoteSummary, SourceError>>;

    fn news<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<Vec<NewsArticle>, SourceError>>;

    fn option_expirations<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, Result<Vec<NaiveDate>, SourceError>>;

    fn option_chain<'a>(
        &'a self,
        symbol: &'a str,
        expiration: NaiveDate,
    ) -> BoxFuture<'a, Result<OptionChain, SourceError>>;

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<SearchResponse, SourceError>>;
}
