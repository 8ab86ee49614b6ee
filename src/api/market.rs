/**
 * Market data API
 *
 * Slow calls are enqueued and answered with `202 {task_id}`; poll
 * `GET /tasks/:task_id` for the result. Option reads and prices are
 * synchronous.
 */

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::services::market_data::{is_valid_interval, is_valid_period, normalize_symbols};
use crate::types::{normalize_symbol, JobRequest, LanguageRequest, OptionChain, PriceQuote, TaskAccepted};
use crate::AppState;

/// Upper bound on symbols per prices request.
const MAX_PRICE_SYMBOLS: usize = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prices", get(get_prices))
        .route("/search", post(search))
        .route("/:symbol", post(enrich))
        .route("/:symbol/analyze", post(analyze))
        .route("/:symbol/strategize", post(strategize))
        .route("/:symbol/option-expirations", get(option_expirations))
        .route("/:symbol/option-chain", get(option_chain))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_period() -> String {
    "1y".to_string()
}

fn default_interval() -> String {
    "1d".to_string()
}

#[derive(Debug, Deserialize)]
pub struct OptionChainQuery {
    pub expiration_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct PricesQuery {
    /// Comma-separated symbols.
    pub symbols: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ExpirationsResponse {
    pub symbol: String,
    pub expirations: Vec<NaiveDate>,
}

fn path_symbol(raw: &str) -> Result<String> {
    normalize_symbol(raw).ok_or_else(|| AppError::Validation(format!("Invalid symbol '{}'", raw)))
}

fn accepted(task_id: String) -> (StatusCode, Json<TaskAccepted>) {
    (StatusCode::ACCEPTED, Json(TaskAccepted { task_id }))
}

/// POST /market-data/:symbol?period=&interval=
async fn enrich(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<(StatusCode, Json<TaskAccepted>)> {
    let symbol = path_symbol(&symbol)?;
    if !is_valid_period(&query.period) {
        return Err(AppError::Validation(format!("Invalid period '{}'", query.period)));
    }
    if !is_valid_interval(&query.interval) {
        return Err(AppError::Validation(format!("Invalid interval '{}'", query.interval)));
    }

    let task_id = state
        .dispatcher
        .enqueue(JobRequest::MarketDataEnrich {
            symbol,
            period: query.period,
            interval: query.interval,
        })
        .await?;
    Ok(accepted(task_id))
}

async fn analyze(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    body: Option<Json<LanguageRequest>>,
) -> Result<(StatusCode, Json<TaskAccepted>)> {
    let symbol = path_symbol(&symbol)?;
    let Json(request) = body.unwrap_or_default();
    let task_id = state
        .dispatcher
        .enqueue(JobRequest::AiAnalyze {
            symbol,
            language: request.language,
        })
        .await?;
    Ok(accepted(task_id))
}

async fn strategize(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    body: Option<Json<LanguageRequest>>,
) -> Result<(StatusCode, Json<TaskAccepted>)> {
    let symbol = path_symbol(&symbol)?;
    let Json(request) = body.unwrap_or_default();
    let task_id = state
        .dispatcher
        .enqueue(JobRequest::AiStrategize {
            symbol,
            language: request.language,
        })
        .await?;
    Ok(accepted(task_id))
}

async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>)> {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(AppError::Validation("Search query must not be empty".to_string()));
    }
    let task_id = state
        .dispatcher
        .enqueue(JobRequest::SymbolSearch { query })
        .await?;
    Ok(accepted(task_id))
}

async fn option_expirations(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ExpirationsResponse>> {
    let symbol = path_symbol(&symbol)?;
    let expirations = state.market.option_expirations(&symbol).await?;
    Ok(Json(ExpirationsResponse { symbol, expirations }))
}

async fn option_chain(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<OptionChainQuery>,
) -> Result<Json<OptionChain>> {
    let symbol = path_symbol(&symbol)?;
    Ok(Json(
        state
            .market
            .option_chain(&symbol, query.expiration_date)
            .await?,
    ))
}

/// GET /market-data/prices?symbols=AAPL,MSFT
async fn get_prices(
    State(state): State<AppState>,
    Query(query): Query<PricesQuery>,
) -> Result<Json<HashMap<String, PriceQuote>>> {
    let symbols = normalize_symbols(query.symbols.split(','));
    if symbols.is_empty() {
        return Err(AppError::BadRequest("No symbols provided".to_string()));
    }
    if symbols.len() > MAX_PRICE_SYMBOLS {
        return Err(AppError::BadRequest(format!(
            "At most {} symbols per request",
            MAX_PRICE_SYMBOLS
        )));
    }
    Ok(Json(state.market.prices(&symbols).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_query_defaults() {
        let query: HistoryQuery = serde_urlencoded::from_str("").unwrap();
        assert_eq!(query.period, "1y");
        assert_eq!(query.interval, "1d");

        let query: HistoryQuery = serde_urlencoded::from_str("period=6mo&interval=1wk").unwrap();
        assert_eq!(query.period, "6mo");
        assert_eq!(query.interval, "1wk");
    }

    #[test]
    fn test_option_chain_query_requires_date() {
        assert!(serde_urlencoded::from_str::<OptionChainQuery>("").is_err());
        let query: OptionChainQuery =
            serde_urlencoded::from_str("expiration_date=2025-01-17").unwrap();
        assert_eq!(query.expiration_date, NaiveDate::from_ymd_opt(2025, 1, 17).unwrap());
    }

    #[test]
    fn test_path_symbol() {
        assert_eq!(path_symbol("brk.b").unwrap(), "BRK.B");
        assert!(path_symbol("not a symbol").is_err());
    }
}
