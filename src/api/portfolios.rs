/**
 * Portfolios API
 *
 * Endpoints:
 * - GET    /portfolios                          - List the caller's portfolios
 * - POST   /portfolios                          - Create a portfolio
 * - GET    /portfolios/default                  - Default portfolio with valuation (created on first access)
 * - GET    /portfolios/:id                      - Portfolio with holdings and totals
 * - PUT    /portfolios/:id                      - Rename / describe
 * - DELETE /portfolios/:id                      - Delete with its ledger and snapshots
 * - GET    /portfolios/:id/transactions         - Ledger in fold order
 * - POST   /portfolios/:id/transactions         - Record a transaction
 * - PUT    /portfolios/:id/transactions/:tid    - Replace a transaction
 * - DELETE /portfolios/:id/transactions/:tid    - Delete a transaction
 * - GET    /portfolios/:id/performance          - Snapshot history
 * - POST   /portfolios/:id/analyze              - Enqueue AI composition analysis
 */

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use super::user::UserId;
use crate::error::Result;
use crate::types::{
    JobRequest, LanguageRequest, NewTransaction, PerformanceHistory, PortfolioInput,
    PortfolioRecord, PortfolioView, TaskAccepted, Transaction, TransactionReceipt,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_portfolios).post(create_portfolio))
        .route("/default", get(get_default_portfolio))
        .route(
            "/:id",
            get(get_portfolio)
                .put(update_portfolio)
                .delete(delete_portfolio),
        )
        .route(
            "/:id/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route(
            "/:id/transactions/:tid",
            put(update_transaction).delete(delete_transaction),
        )
        .route("/:id/performance", get(get_performance))
        .route("/:id/analyze", post(analyze_portfolio))
}

/// Date range of the performance endpoint. Both bounds are inclusive.
#[derive(Debug, Default, Deserialize)]
pub struct PerformanceQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

async fn list_portfolios(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<PortfolioRecord>>> {
    Ok(Json(state.portfolios.list_portfolios(&user_id)?))
}

async fn create_portfolio(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(input): Json<PortfolioInput>,
) -> Result<(StatusCode, Json<PortfolioRecord>)> {
    let record = state.portfolios.create_portfolio(&user_id, &input)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_default_portfolio(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<PortfolioView>> {
    Ok(Json(state.portfolios.default_view(&user_id).await?))
}

async fn get_portfolio(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<Json<PortfolioView>> {
    Ok(Json(state.portfolios.view(&user_id, id).await?))
}

async fn update_portfolio(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(input): Json<PortfolioInput>,
) -> Result<Json<PortfolioRecord>> {
    Ok(Json(state.portfolios.update_portfolio(&user_id, id, &input)?))
}

async fn delete_portfolio(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.portfolios.delete_portfolio(&user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_transactions(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Transaction>>> {
    Ok(Json(state.portfolios.list_transactions(&user_id, id)?))
}

/// POST /portfolios/:id/transactions
///
/// 422 with `INSUFFICIENT_QUANTITY` when a SELL exceeds the holding; the
/// transaction is not recorded.
async fn create_transaction(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(new): Json<NewTransaction>,
) -> Result<(StatusCode, Json<TransactionReceipt>)> {
    let receipt = state.portfolios.add_transaction(&user_id, id, new).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn update_transaction(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path((id, tid)): Path<(i64, i64)>,
    Json(new): Json<NewTransaction>,
) -> Result<Json<TransactionReceipt>> {
    Ok(Json(
        state
            .portfolios
            .update_transaction(&user_id, id, tid, new)
            .await?,
    ))
}

async fn delete_transaction(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path((id, tid)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    state
        .portfolios
        .delete_transaction(&user_id, id, tid)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_performance(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Query(range): Query<PerformanceQuery>,
) -> Result<Json<PerformanceHistory>> {
    Ok(Json(state.portfolios.performance_history(
        &user_id,
        id,
        range.start,
        range.end,
    )?))
}

async fn analyze_portfolio(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    body: Option<Json<LanguageRequest>>,
) -> Result<(StatusCode, Json<TaskAccepted>)> {
    state.portfolios.owned(&user_id, id)?;
    let Json(request) = body.unwrap_or_default();
    let task_id = state
        .dispatcher
        .enqueue(JobRequest::AiPortfolioAnalyze {
            portfolio_id: id,
            language: request.language,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(TaskAccepted { task_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_query_parsing() {
        let query: PerformanceQuery =
            serde_urlencoded::from_str("start=2024-01-01&end=2024-03-31").unwrap();
        assert_eq!(query.start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(query.end, NaiveDate::from_ymd_opt(2024, 3, 31));

        let empty: PerformanceQuery = serde_urlencoded::from_str("").unwrap();
        assert!(empty.start.is_none() && empty.end.is_none());
    }
}
