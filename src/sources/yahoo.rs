//! Yahoo Finance client for quotes, history, options, search and fundamentals.
//!
//! Uses the unofficial Yahoo Finance endpoints. Every numeric field goes through
//! [`finite`] so NaN never leaves this module.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures_util::future::{self, BoxFuture, FutureExt};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{MarketDataProvider, SourceError};
use crate::types::{
    finite, Fundamentals, NewsArticle, OhlcvBar, OptionChain, OptionContract, Quote, QuoteSummary,
    SearchResponse, SymbolSearchResult, TradingInfo,
};

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const SUMMARY_MODULES: &str =
    "price,summaryDetail,summaryProfile,defaultKeyStatistics,financialData,calendarEvents";
const NEWS_COUNT: u32 = 8;

/// Yahoo Finance chart response.
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    meta: YahooMeta,
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<u64>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooOptionsResponse {
    option_chain: YahooOptionChain,
}

#[derive(Debug, Deserialize)]
struct YahooOptionChain {
    result: Option<Vec<YahooOptionResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooOptionResult {
    #[serde(default)]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    options: Vec<YahooOptionSet>,
}

#[derive(Debug, Deserialize)]
struct YahooOptionSet {
    #[serde(default)]
    calls: Vec<YahooContract>,
    #[serde(default)]
    puts: Vec<YahooContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooContract {
    contract_symbol: String,
    strike: Option<f64>,
    bid: Option<f64>,
    ask: Option<f64>,
    last_price: Option<f64>,
    implied_volatility: Option<f64>,
    #[serde(default)]
    in_the_money: bool,
}

#[derive(Debug, Default, Deserialize)]
struct YahooSearchResponse {
    #[serde(default)]
    quotes: Vec<YahooSearchQuote>,
    #[serde(default)]
    news: Vec<YahooNews>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooSearchQuote {
    symbol: Option<String>,
    shortname: Option<String>,
    longname: Option<String>,
    exchange: Option<String>,
    quote_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooNews {
    title: Option<String>,
    publisher: Option<String>,
    link: Option<String>,
    provider_publish_time: Option<i64>,
}

/// Normalize symbol for Yahoo Finance API.
/// Yahoo uses hyphens instead of dots for share classes (e.g., BRK-B not BRK.B)
fn normalize_yahoo_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase().replace('.', "-")
}

fn timestamp_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn chart_to_bars(symbol: &str, data: YahooChartResponse) -> Result<(YahooMeta, Vec<OhlcvBar>), SourceError> {
    if let Some(error) = data.chart.error {
        if error.code.eq_ignore_ascii_case("Not Found") {
            return Err(SourceError::NotFound(symbol.to_string()));
        }
        return Err(SourceError::Parse(format!(
            "Yahoo API error: {} - {}",
            error.code, error.description
        )));
    }

    let result = data
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| SourceError::NotFound(symbol.to_string()))?;

    let timestamps = result.timestamp.unwrap_or_default();
    let quote = result.indicators.quote.into_iter().next();
    let (opens, highs, lows, closes, volumes) = match quote {
        Some(q) => (
            q.open.unwrap_or_default(),
            q.high.unwrap_or_default(),
            q.low.unwrap_or_default(),
            q.close.unwrap_or_default(),
            q.volume.unwrap_or_default(),
        ),
        None => Default::default(),
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &timestamp) in timestamps.iter().enumerate() {
        // Bars without a usable close carry no information.
        let Some(close) = finite(closes.get(i).copied().flatten()).filter(|c| *c > 0.0) else {
            continue;
        };
        let Some(date) = timestamp_to_utc(timestamp) else {
            continue;
        };

        bars.push(OhlcvBar {
            date,
            open: finite(opens.get(i).copied().flatten()),
            high: finite(highs.get(i).copied().flatten()),
            low: finite(lows.get(i).copied().flatten()),
            close,
            volume: volumes.get(i).copied().flatten(),
            sma_20: None,
            sma_50: None,
            rsi_14: None,
        });
    }
    bars.sort_by_key(|b| b.date);

    Ok((result.meta, bars))
}

fn contract(c: YahooContract) -> OptionContract {
    OptionContract {
        contract_symbol: c.contract_symbol,
        strike: finite(c.strike),
        bid: finite(c.bid),
        ask: finite(c.ask),
        last: finite(c.last_price),
        implied_volatility: finite(c.implied_volatility),
        in_the_money: c.in_the_money,
    }
}

fn news_article(n: YahooNews) -> Option<NewsArticle> {
    Some(NewsArticle {
        title: n.title.filter(|t| !t.is_empty())?,
        publisher: n.publisher,
        link: n.link,
        provider_publish_time: n.provider_publish_time.and_then(timestamp_to_utc),
    })
}

/// `{ "raw": 1.23, "fmt": "1.23" }` or a bare number.
fn raw_f64(module: &Value, field: &str) -> Option<f64> {
    let value = module.get(field)?;
    let number = value.get("raw").unwrap_or(value).as_f64();
    finite(number)
}

fn raw_str(module: &Value, field: &str) -> Option<String> {
    module
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn summary_from_modules(result: &Value) -> QuoteSummary {
    let null = Value::Null;
    let price = result.get("price").unwrap_or(&null);
    let detail = result.get("summaryDetail").unwrap_or(&null);
    let profile = result.get("summaryProfile").unwrap_or(&null);
    let stats = result.get("defaultKeyStatistics").unwrap_or(&null);
    let financial = result.get("financialData").unwrap_or(&null);
    let calendar = result.get("calendarEvents").unwrap_or(&null);

    let earnings_date = calendar
        .get("earnings")
        .and_then(|e| e.get("earningsDate"))
        .and_then(Value::as_array)
        .and_then(|dates| dates.first())
        .and_then(|d| d.get("raw").unwrap_or(d).as_i64())
        .and_then(timestamp_to_utc);

    let fundamentals = Fundamentals {
        market_cap: raw_f64(price, "marketCap").or_else(|| raw_f64(detail, "marketCap")),
        sector: raw_str(profile, "sector"),
        industry: raw_str(profile, "industry"),
        description: raw_str(profile, "longBusinessSummary"),
        pe_ratio: raw_f64(detail, "trailingPE"),
        forward_pe: raw_f64(detail, "forwardPE").or_else(|| raw_f64(stats, "forwardPE")),
        price_to_book: raw_f64(stats, "priceToBook"),
        price_to_sales: raw_f64(detail, "priceToSalesTrailing12Months"),
        eps: raw_f64(stats, "trailingEps"),
        dividend_yield: raw_f64(detail, "dividendYield"),
        payout_ratio: raw_f64(detail, "payoutRatio"),
        beta: raw_f64(detail, "beta"),
        profit_margins: raw_f64(financial, "profitMargins"),
        return_on_equity: raw_f64(financial, "returnOnEquity"),
        total_debt: raw_f64(financial, "totalDebt"),
        total_cash: raw_f64(financial, "totalCash"),
        free_cashflow: raw_f64(financial, "freeCashflow"),
        fifty_two_week_high: raw_f64(detail, "fiftyTwoWeekHigh"),
        fifty_two_week_low: raw_f64(detail, "fiftyTwoWeekLow"),
        earnings_date,
        analyst_recommendation: raw_str(financial, "recommendationKey"),
        analyst_target_price: raw_f64(financial, "targetMeanPrice"),
        analyst_count: raw_f64(financial, "numberOfAnalystOpinions").map(|n| n as u32),
    };

    let trading_info = TradingInfo {
        market_state: raw_str(price, "marketState"),
        regular_market_change_percent: raw_f64(price, "regularMarketChangePercent"),
        pre_market_price: raw_f64(price, "preMarketPrice"),
        pre_market_change_percent: raw_f64(price, "preMarketChangePercent"),
        post_market_price: raw_f64(price, "postMarketPrice"),
        post_market_change_percent: raw_f64(price, "postMarketChangePercent"),
    };

    QuoteSummary {
        short_name: raw_str(price, "shortName"),
        long_name: raw_str(price, "longName"),
        current_price: raw_f64(price, "regularMarketPrice")
            .or_else(|| raw_f64(financial, "currentPrice")),
        fundamentals,
        trading_info,
    }
}

/// Yahoo Finance API client.
pub struct YahooFinanceClient {
    client: Client,
    base_url: String,
}

impl YahooFinanceClient {
    /// Create a new Yahoo Finance client.
    pub fn new() -> Self {
        Self::with_config(BASE_URL, None)
    }

    /// Client against another host (a mirror or proxy), optionally authenticated.
    pub fn with_config(base_url: &str, api_key: Option<&str>) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(value) = api_key.and_then(|key| HeaderValue::from_str(key).ok()) {
            headers.insert("X-API-KEY", value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .default_headers(headers)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        symbol: &str,
        url: &str,
    ) -> Result<T, SourceError> {
        debug!("Fetching Yahoo Finance data: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(symbol.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    /// Fetch historical bars.
    ///
    /// Arguments:
    /// - symbol: Stock/ETF symbol (e.g., "AAPL", "SPY")
    /// - range: Time range ("1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max")
    /// - interval: Data interval ("1m", "5m", "1h", "1d", "1wk", "1mo")
    pub async fn get_historical_data(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<OhlcvBar>, SourceError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval={}&includePrePost=false",
            self.base_url,
            normalize_yahoo_symbol(symbol),
            range,
            interval
        );
        let data: YahooChartResponse = self.get_json(symbol, &url).await?;
        let (_, bars) = chart_to_bars(symbol, data)?;
        if bars.is_empty() {
            return Err(SourceError::NotFound(symbol.to_string()));
        }
        Ok(bars)
    }

    /// Latest price and previous close from a two-day chart.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, SourceError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=2d&interval=1d",
            self.base_url,
            normalize_yahoo_symbol(symbol)
        );
        let data: YahooChartResponse = self.get_json(symbol, &url).await?;
        let (meta, bars) = chart_to_bars(symbol, data)?;

        let price = finite(meta.regular_market_price)
            .or_else(|| bars.last().map(|b| b.close))
            .ok_or_else(|| SourceError::NotFound(symbol.to_string()))?;
        let prior_close = if bars.len() >= 2 {
            Some(bars[bars.len() - 2].close)
        } else {
            finite(meta.chart_previous_close).or(finite(meta.previous_close))
        };

        Ok(Quote { price, prior_close })
    }

    pub async fn get_option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, SourceError> {
        let url = format!(
            "{}/v7/finance/options/{}",
            self.base_url,
            normalize_yahoo_symbol(symbol)
        );
        let data: YahooOptionsResponse = self.get_json(symbol, &url).await?;
        let result = data
            .option_chain
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| SourceError::NotFound(symbol.to_string()))?;

        Ok(result
            .expiration_dates
            .into_iter()
            .filter_map(timestamp_to_utc)
            .map(|dt| dt.date_naive())
            .collect())
    }

    pub async fn get_option_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<OptionChain, SourceError> {
        let epoch = expiration
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .ok_or_else(|| SourceError::Parse(format!("invalid expiration {}", expiration)))?;
        let url = format!(
            "{}/v7/finance/options/{}?date={}",
            self.base_url,
            normalize_yahoo_symbol(symbol),
            epoch
        );
        let data: YahooOptionsResponse = self.get_json(symbol, &url).await?;
        let set = data
            .option_chain
            .result
            .and_then(|r| r.into_iter().next())
            .and_then(|r| r.options.into_iter().next())
            .ok_or_else(|| {
                SourceError::NotFound(format!("{} options expiring {}", symbol, expiration))
            })?;

        Ok(OptionChain {
            symbol: symbol.to_uppercase(),
            expiration,
            calls: set.calls.into_iter().map(contract).collect(),
            puts: set.puts.into_iter().map(contract).collect(),
        })
    }

    async fn raw_search(&self, query: &str, quotes: u32, news: u32) -> Result<YahooSearchResponse, SourceError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/v1/finance/search", self.base_url),
            &[
                ("q", query),
                ("quotesCount", &quotes.to_string()),
                ("newsCount", &news.to_string()),
            ],
        )
        .map_err(|e| SourceError::Parse(e.to_string()))?;
        self.get_json(query, url.as_str()).await
    }

    pub async fn search_symbols(&self, query: &str) -> Result<SearchResponse, SourceError> {
        let data = self.raw_search(query, 10, NEWS_COUNT).await?;
        Ok(SearchResponse {
            quotes: data
                .quotes
                .into_iter()
                .filter_map(|q| {
                    Some(SymbolSearchResult {
                        symbol: q.symbol?,
                        name: q.longname.or(q.shortname),
                        exchange: q.exchange,
                        quote_type: q.quote_type,
                    })
                })
                .collect(),
            news: data.news.into_iter().filter_map(news_article).collect(),
        })
    }

    pub async fn get_news(&self, symbol: &str) -> Result<Vec<NewsArticle>, SourceError> {
        let data = self.raw_search(symbol, 0, NEWS_COUNT).await?;
        Ok(data.news.into_iter().filter_map(news_article).collect())
    }

    pub async fn get_summary(&self, symbol: &str) -> Result<QuoteSummary, SourceError> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}?modules={}",
            self.base_url,
            normalize_yahoo_symbol(symbol),
            SUMMARY_MODULES
        );
        let data: Value = self.get_json(symbol, &url).await?;
        let result = data
            .pointer("/quoteSummary/result/0")
            .ok_or_else(|| SourceError::NotFound(symbol.to_string()))?;
        Ok(summary_from_modules(result))
    }
}

impl Default for YahooFinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataProvider for YahooFinanceClient {
    fn history<'a>(
        &'a self,
        symbol: &'a str,
        period: &'a str,
        interval: &'a str,
    ) -> BoxFuture<'a, Result<Vec<OhlcvBar>, SourceError>> {
        self.get_historical_data(symbol, period, interval).boxed()
    }

    fn quotes<'a>(
        &'a self,
        symbols: &'a [String],
    ) -> BoxFuture<'a, Result<HashMap<String, Quote>, SourceError>> {
        async move {
            let fetches = symbols.iter().map(|s| async move { (s, self.get_quote(s).await) });
            let mut quotes = HashMap::new();
            for (symbol, result) in future::join_all(fetches).await {
                match result {
                    Ok(quote) => {
                        quotes.insert(symbol.to_uppercase(), quote);
                    }
                    Err(SourceError::NotFound(_)) => debug!("No quote for {}", symbol),
                    Err(e) => warn!("Quote fetch failed for {}: {}", symbol, e),
                }
            }
            Ok(quotes)
        }
        .boxed()
    }

    fn summary<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<QuoteSummary, SourceError>> {
        self.get_summary(symbol).boxed()
    }

    fn news<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<Vec<NewsArticle>, SourceError>> {
        self.get_news(symbol).boxed()
    }

    fn option_expirations<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, Result<Vec<NaiveDate>, SourceError>> {
        self.get_option_expirations(symbol).boxed()
    }

    fn option_chain<'a>(
        &'a self,
        symbol: &'a str,
        expiration: NaiveDate,
    ) -> BoxFuture<'a, Result<OptionChain, SourceError>> {
        self.get_option_chain(symbol, expiration).boxed()
    }

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<SearchResponse, SourceError>> {
        self.search_symbols(query).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // normalize_yahoo_symbol Tests
    // =========================================================================

    #[test]
    fn test_normalize_yahoo_symbol() {
        assert_eq!(normalize_yahoo_symbol("aapl"), "AAPL");
        assert_eq!(normalize_yahoo_symbol("brk.b"), "BRK-B");
        assert_eq!(normalize_yahoo_symbol("BRK-B"), "BRK-B");
    }

    // =========================================================================
    // Chart parsing Tests
    // =========================================================================

    fn chart(closes: serde_json::Value) -> YahooChartResponse {
        serde_json::from_value(json!({
            "chart": {
                "result": [{
                    "meta": {"regularMarketPrice": 12.0, "chartPreviousClose": 10.0},
                    "timestamp": [1704153600, 1704240000, 1704326400],
                    "indicators": {"quote": [{
                        "open": [10.0, null, 11.0],
                        "high": [10.5, null, 12.5],
                        "low": [9.5, null, 10.5],
                        "close": closes,
                        "volume": [100, null, 300]
                    }]}
                }],
                "error": null
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_chart_skips_bars_without_close() {
        let (_, bars) = chart_to_bars("XYZ", chart(json!([10.0, null, 12.0]))).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 12.0);
        assert_eq!(bars[1].volume, Some(300));
    }

    #[test]
    fn test_chart_missing_fields_become_none() {
        let (_, bars) = chart_to_bars("XYZ", chart(json!([10.0, 11.0, 12.0]))).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].open, None);
        assert_eq!(bars[1].volume, None);
    }

    #[test]
    fn test_chart_error_not_found() {
        let data: YahooChartResponse = serde_json::from_value(json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        }))
        .unwrap();
        assert!(matches!(
            chart_to_bars("ZZZZ", data),
            Err(SourceError::NotFound(s)) if s == "ZZZZ"
        ));
    }

    // =========================================================================
    // Summary parsing Tests
    // =========================================================================

    #[test]
    fn test_summary_reads_raw_values() {
        let result = json!({
            "price": {
                "shortName": "Apple Inc.",
                "regularMarketPrice": {"raw": 190.5, "fmt": "190.50"},
                "marketState": "REGULAR"
            },
            "summaryDetail": {"trailingPE": {"raw": 29.1}, "beta": {}},
            "summaryProfile": {"sector": "Technology"},
            "financialData": {"numberOfAnalystOpinions": {"raw": 38}}
        });
        let summary = summary_from_modules(&result);

        assert_eq!(summary.short_name.as_deref(), Some("Apple Inc."));
        assert_eq!(summary.current_price, Some(190.5));
        assert_eq!(summary.fundamentals.pe_ratio, Some(29.1));
        assert_eq!(summary.fundamentals.beta, None);
        assert_eq!(summary.fundamentals.analyst_count, Some(38));
        assert_eq!(summary.trading_info.market_state.as_deref(), Some("REGULAR"));
    }

    #[test]
    fn test_contract_normalization() {
        let raw: YahooContract = serde_json::from_value(json!({
            "contractSymbol": "AAPL250117C00150000",
            "strike": 150.0,
            "bid": null,
            "lastPrice": 3.2,
            "inTheMoney": true
        }))
        .unwrap();
        let c = contract(raw);
        assert_eq!(c.bid, None);
        assert_eq!(c.ask, None);
        assert_eq!(c.last, Some(3.2));
        assert!(c.in_the_money);
    }
}
