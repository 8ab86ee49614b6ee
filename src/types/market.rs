//! Market data payloads.
//!
//! Every float that originates at the provider passes through [`finite`]
//! before it is stored in one of these types, so serialized payloads never
//! carry NaN or infinities.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Canonical numeric-or-absent normalization: NaN and infinities become `None`.
pub fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// One historical price bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub date: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma_20: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma_50: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi_14: Option<f64>,
}

/// Latest value of each indicator, `None` when history is too short.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_100: Option<f64>,
    pub sma_150: Option<f64>,
    pub sma_200: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub market_cap: Option<f64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub pe_ratio: Option<f64>,
    pub forward_pe: Option<f64>,
    pub price_to_book: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub eps: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub payout_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub profit_margins: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub total_debt: Option<f64>,
    pub total_cash: Option<f64>,
    pub free_cashflow: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub earnings_date: Option<DateTime<Utc>>,
    pub analyst_recommendation: Option<String>,
    pub analyst_target_price: Option<f64>,
    pub analyst_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingInfo {
    pub market_state: Option<String>,
    pub regular_market_change_percent: Option<f64>,
    pub pre_market_price: Option<f64>,
    pub pre_market_change_percent: Option<f64>,
    pub post_market_price: Option<f64>,
    pub post_market_change_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub publisher: Option<String>,
    pub link: Option<String>,
    pub provider_publish_time: Option<DateTime<Utc>>,
}

/// Name, fundamentals and session data from the provider's summary endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteSummary {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub current_price: Option<f64>,
    pub fundamentals: Fundamentals,
    pub trading_info: TradingInfo,
}

/// Result payload of `market_data_enrich`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedMarketData {
    pub symbol: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub current_price: Option<f64>,
    pub historical_prices: Vec<OhlcvBar>,
    pub technicals: TechnicalIndicators,
    pub fundamentals: Fundamentals,
    pub trading_info: TradingInfo,
    pub news: Vec<NewsArticle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub contract_symbol: String,
    pub strike: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub implied_volatility: Option<f64>,
    pub in_the_money: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub symbol: String,
    pub expiration: NaiveDate,
    pub calls: Vec<OptionContract>,
    pub puts: Vec<OptionContract>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSearchResult {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub quote_type: Option<String>,
}

/// Result payload of `symbol_search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub quotes: Vec<SymbolSearchResult>,
    pub news: Vec<NewsArticle>,
}

/// Raw quote as returned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub prior_close: Option<f64>,
}

/// Entry of `GET /market-data/prices`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
}

impl From<Quote> for PriceQuote {
    fn from(quote: Quote) -> Self {
        let change = quote.prior_close.map(|prev| quote.price - prev);
        let change_percent = quote
            .prior_close
            .filter(|prev| *prev != 0.0)
            .map(|prev| (quote.price - prev) / prev * 100.0);
        Self {
            price: quote.price,
            change: finite(change),
            change_percent: finite(change_percent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_drops_nan_and_infinity() {
        assert_eq!(finite(Some(1.5)), Some(1.5));
        assert_eq!(finite(Some(f64::NAN)), None);
        assert_eq!(finite(Some(f64::INFINITY)), None);
        assert_eq!(finite(None), None);
    }

    #[test]
    fn test_price_quote_change() {
        let quote = PriceQuote::from(Quote {
            price: 110.0,
            prior_close: Some(100.0),
        });
        assert_eq!(quote.change, Some(10.0));
        assert_eq!(quote.change_percent, Some(10.0));

        let zero_close = PriceQuote::from(Quote {
            price: 5.0,
            prior_close: Some(0.0),
        });
        assert_eq!(zero_close.change_percent, None);
    }
}
