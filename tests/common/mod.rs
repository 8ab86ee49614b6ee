//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use holdview::config::{AiConfig, Config, RetryPolicy};
use holdview::services::{AiClient, Broker, SqliteStore, TaskDispatcher, TaskStore};
use holdview::sources::openrouter::ChatRequest;
use holdview::sources::{ChatTransport, MarketDataProvider, SourceError, TransportError};
use holdview::types::{
    NewsArticle, OhlcvBar, OptionChain, OptionContract, Quote, QuoteSummary, SearchResponse,
    SymbolSearchResult,
};
use holdview::AppState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Market data
// ============================================================================

/// Daily bars starting 2024-01-01, one per close.
pub fn daily_bars(closes: &[f64]) -> Vec<OhlcvBar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| OhlcvBar {
            date: start + ChronoDuration::days(i as i64),
            open: Some(*close),
            high: Some(*close),
            low: Some(*close),
            close: *close,
            volume: Some(1_000),
            sma_20: None,
            sma_50: None,
            rsi_14: None,
        })
        .collect()
}

/// In-memory provider with knobs for failure injection.
#[derive(Default)]
pub struct FakeProvider {
    bars: HashMap<String, Vec<OhlcvBar>>,
    quotes: HashMap<String, Quote>,
    transient_history_failures: AtomicU32,
    quotes_down: AtomicBool,
    pub history_calls: AtomicU32,
    pub quote_calls: AtomicU32,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, symbol: &str, closes: &[f64]) -> Self {
        self.bars.insert(symbol.to_string(), daily_bars(closes));
        self
    }

    pub fn with_quote(mut self, symbol: &str, price: f64, prior_close: Option<f64>) -> Self {
        self.quotes
            .insert(symbol.to_string(), Quote { price, prior_close });
        self
    }

    /// Make the next `n` history calls fail with HTTP 503.
    pub fn failing_history(self, n: u32) -> Self {
        self.transient_history_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn set_quotes_down(&self, down: bool) {
        self.quotes_down.store(down, Ordering::SeqCst);
    }
}

impl MarketDataProvider for FakeProvider {
    fn history<'a>(
        &'a self,
        symbol: &'a str,
        _period: &'a str,
        _interval: &'a str,
    ) -> BoxFuture<'a, Result<Vec<OhlcvBar>, SourceError>> {
        async move {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transient_history_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_history_failures
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(SourceError::Http {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                });
            }
            self.bars
                .get(symbol)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(symbol.to_string()))
        }
        .boxed()
    }

    fn quotes<'a>(
        &'a self,
        symbols: &'a [String],
    ) -> BoxFuture<'a, Result<HashMap<String, Quote>, SourceError>> {
        async move {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            if self.quotes_down.load(Ordering::SeqCst) {
                return Err(SourceError::Http {
                    status: 400,
                    message: "quotes disabled".to_string(),
                });
            }
            Ok(symbols
                .iter()
                .filter_map(|s| self.quotes.get(s).map(|q| (s.clone(), *q)))
                .collect())
        }
        .boxed()
    }

    fn summary<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<QuoteSummary, SourceError>> {
        async move {
            Ok(QuoteSummary {
                short_name: Some(format!("{} Inc.", symbol)),
                ..Default::default()
            })
        }
        .boxed()
    }

    fn news<'a>(&'a self, _symbol: &'a str) -> BoxFuture<'a, Result<Vec<NewsArticle>, SourceError>> {
        async move {
            Err(SourceError::Http {
                status: 500,
                message: "news backend down".to_string(),
            })
        }
        .boxed()
    }

    fn option_expirations<'a>(
        &'a self,
        _symbol: &'a str,
    ) -> BoxFuture<'a, Result<Vec<NaiveDate>, SourceError>> {
        async move { Ok(vec![NaiveDate::from_ymd_opt(2025, 1, 17).unwrap()]) }.boxed()
    }

    fn option_chain<'a>(
        &'a self,
        symbol: &'a str,
        expiration: NaiveDate,
    ) -> BoxFuture<'a, Result<OptionChain, SourceError>> {
        async move {
            Ok(OptionChain {
                symbol: symbol.to_string(),
                expiration,
                calls: vec![OptionContract {
                    contract_symbol: format!("{}250117C00150000", symbol),
                    strike: Some(150.0),
                    bid: None,
                    ask: Some(5.2),
                    last: Some(5.0),
                    implied_volatility: None,
                    in_the_money: true,
                }],
                puts: Vec::new(),
            })
        }
        .boxed()
    }

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<SearchResponse, SourceError>> {
        async move {
            let hit = |symbol: &str, name: &str| SymbolSearchResult {
                symbol: symbol.to_string(),
                name: Some(name.to_string()),
                exchange: Some("NMS".to_string()),
                quote_type: Some("EQUITY".to_string()),
            };
            Ok(SearchResponse {
                quotes: vec![
                    hit("AAPL", query),
                    hit("AAPL", "duplicate"),
                    hit("APLE", "Apple Hospitality"),
                ],
                news: Vec::new(),
            })
        }
        .boxed()
    }
}

// ============================================================================
// AI transport
// ============================================================================

/// Chat transport replaying a fixed script of outcomes.
pub struct ScriptedTransport {
    outcomes: Mutex<Vec<Result<String, TransportError>>>,
    pub calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(mut outcomes: Vec<Result<String, TransportError>>) -> Arc<Self> {
        outcomes.reverse();
        Arc::new(Self {
            outcomes: Mutex::new(outcomes),
            calls: AtomicU32::new(0),
        })
    }
}

impl ChatTransport for ScriptedTransport {
    fn complete<'a>(&'a self, _request: &'a ChatRequest) -> BoxFuture<'a, Result<String, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .outcomes
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".to_string())));
        async move { next }.boxed()
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        jitter: Duration::ZERO,
    }
}

pub fn scripted_ai(transport: Arc<ScriptedTransport>) -> Arc<AiClient> {
    let config = AiConfig {
        api_key: Some("test".to_string()),
        retry: fast_retry(3),
        ..AiConfig::default()
    };
    Arc::new(AiClient::with_transport(transport, config))
}

// ============================================================================
// Application state
// ============================================================================

pub fn test_config() -> Config {
    let mut config = Config::from_env();
    config.market_data_retry = fast_retry(3);
    config.quote_cache_ttl = Duration::from_secs(60);
    config
}

pub fn test_dispatcher() -> TaskDispatcher {
    TaskDispatcher::new(Broker::memory(), TaskStore::memory(Duration::from_secs(60)))
}

/// State over an in-memory database and the in-process pipeline.
pub fn test_state(provider: Arc<FakeProvider>) -> AppState {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    AppState::new(Arc::new(test_config()), store, provider, test_dispatcher())
}
