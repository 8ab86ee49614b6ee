//! Market data service: cached quotes, enrichment with technicals, and
//! passthrough option/search reads over a [`MarketDataProvider`].

use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::TtlCache;
use super::indicators::{annotate_bars, compute_technicals};
use crate::config::RetryPolicy;
use crate::sources::{MarketDataProvider, SourceError};
use crate::types::{
    EnrichedMarketData, OhlcvBar, OptionChain, PriceQuote, Quote, SearchResponse,
};

pub const VALID_PERIODS: &[&str] = &[
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];
pub const VALID_INTERVALS: &[&str] = &[
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

/// Enrichment results stay around for re-delivered jobs and repeat requests.
const ENRICHED_TTL: Duration = Duration::from_secs(300);

pub fn is_valid_period(period: &str) -> bool {
    VALID_PERIODS.contains(&period)
}

pub fn is_valid_interval(interval: &str) -> bool {
    VALID_INTERVALS.contains(&interval)
}

/// Uppercase, trim and deduplicate a symbol list, keeping first occurrences.
pub fn normalize_symbols<'a>(symbols: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

type EnrichKey = (String, String, String);

pub struct MarketDataService {
    provider: Arc<dyn MarketDataProvider>,
    retry: RetryPolicy,
    quotes: TtlCache<String, Quote>,
    enriched: TtlCache<EnrichKey, EnrichedMarketData>,
}

impl MarketDataService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, quote_ttl: Duration, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            quotes: TtlCache::new(quote_ttl),
            enriched: TtlCache::new(ENRICHED_TTL),
        }
    }

    /// Retry transient provider failures with the configured backoff.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        class = "transient",
                        error = %e,
                        "{} failed, retrying in {:?}", what, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(attempt, error = %e, "{} failed after retries", what);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Chronologically ordered bars with per-bar SMA20/SMA50/RSI14.
    pub async fn fetch_history(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<OhlcvBar>, SourceError> {
        let mut bars = self
            .with_retry("history fetch", || self.provider.history(symbol, period, interval))
            .await?;
        if bars.is_empty() {
            return Err(SourceError::NotFound(symbol.to_string()));
        }
        annotate_bars(&mut bars);
        Ok(bars)
    }

    /// Quotes for `symbols`, served from cache where fresh. Unknown symbols are omitted.
    pub async fn fetch_quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, SourceError> {
        let symbols = normalize_symbols(symbols.iter().map(String::as_str));
        let mut quotes = HashMap::with_capacity(symbols.len());
        let mut missing = Vec::new();

        for symbol in symbols {
            match self.quotes.get(&symbol) {
                Some(q) => {
                    quotes.insert(symbol, q);
                }
                None => missing.push(symbol),
            }
        }

        if !missing.is_empty() {
            debug!("Fetching {} quotes from provider", missing.len());
            let fetched = self
                .with_retry("quote fetch", || self.provider.quotes(&missing))
                .await?;
            for (symbol, quote) in fetched {
                let symbol = symbol.to_uppercase();
                self.quotes.insert(symbol.clone(), quote);
                quotes.insert(symbol, quote);
            }
        }

        Ok(quotes)
    }

    /// `symbol -> {price, change, change_percent}`.
    pub async fn prices(&self, symbols: &[String]) -> Result<HashMap<String, PriceQuote>, SourceError> {
        Ok(self
            .fetch_quotes(symbols)
            .await?
            .into_iter()
            .map(|(symbol, quote)| (symbol, PriceQuote::from(quote)))
            .collect())
    }

    pub async fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, SourceError> {
        self.with_retry("option expirations", || self.provider.option_expirations(symbol))
            .await
    }

    pub async fn option_chain(&self, symbol: &str, expiration: NaiveDate) -> Result<OptionChain, SourceError> {
        self.with_retry("option chain", || self.provider.option_chain(symbol, expiration))
            .await
    }

    /// Symbol search, deduplicated by symbol with the first occurrence kept.
    pub async fn search(&self, query: &str) -> Result<SearchResponse, SourceError> {
        let mut response = self
            .with_retry("symbol search", || self.provider.search(query))
            .await?;
        let mut seen = HashSet::new();
        response
            .quotes
            .retain(|q| seen.insert(q.symbol.to_uppercase()));
        Ok(response)
    }

    /// Build [`EnrichedMarketData`]. History is required; summary and news
    /// degrade to empty on failure. The result overwrites any cached entry.
    pub async fn enrich(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<EnrichedMarketData, SourceError> {
        let symbol = symbol.trim().to_uppercase();
        let historical_prices = self.fetch_history(&symbol, period, interval).await?;

        let (summary, news) = futures_util::future::join(
            self.with_retry("summary fetch", || self.provider.summary(&symbol)),
            self.provider.news(&symbol),
        )
        .await;
        let summary = summary.unwrap_or_else(|e| {
            warn!("Summary unavailable for {}: {}", symbol, e);
            Default::default()
        });
        let news = news.unwrap_or_else(|e| {
            warn!("News unavailable for {}: {}", symbol, e);
            Vec::new()
        });

        let closes: Vec<f64> = historical_prices.iter().map(|b| b.close).collect();
        let technicals = compute_technicals(&closes);
        let current_price = summary
            .current_price
            .or_else(|| historical_prices.last().map(|b| b.close));

        let data = EnrichedMarketData {
            symbol: symbol.clone(),
            short_name: summary.short_name,
            long_name: summary.long_name,
            last_updated: Utc::now(),
            current_price,
            historical_prices,
            technicals,
            fundamentals: summary.fundamentals,
            trading_info: summary.trading_info,
            news,
        };

        self.enriched.insert(
            (symbol.clone(), period.to_string(), interval.to_string()),
            data.clone(),
        );
        info!("Enriched market data for {} ({} {})", symbol, period, interval);
        Ok(data)
    }

    /// Cached enrichment if fresh, otherwise a new one.
    pub async fn enriched_or_fetch(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<EnrichedMarketData, SourceError> {
        let key = (symbol.trim().to_uppercase(), period.to_string(), interval.to_string());
        if let Some(cached) = self.enriched.get(&key) {
            return Ok(cached);
        }
        self.enrich(symbol, period, interval).await
    }

    /// Drop expired cache entries.
    pub fn purge_caches(&self) {
        self.quotes.purge_expired();
        self.enriched.purge_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbols() {
        let symbols = normalize_symbols(["aapl", " MSFT ", "AAPL", ""]);
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_period_and_interval_validation() {
        assert!(is_valid_period("1y"));
        assert!(!is_valid_period("7y"));
        assert!(is_valid_interval("1d"));
        assert!(!is_valid_interval("2d"));
    }
}
