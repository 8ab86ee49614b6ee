use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};

use super::user::UserId;
use crate::error::Result;
use crate::types::{WatchlistInput, WatchlistItem};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_watchlist).post(add_symbol))
        .route("/:symbol", delete(remove_symbol))
}

async fn list_watchlist(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<WatchlistItem>>> {
    Ok(Json(state.portfolios.watchlist(&user_id)?))
}

/// 409 when the symbol is already listed.
async fn add_symbol(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(input): Json<WatchlistInput>,
) -> Result<(StatusCode, Json<WatchlistItem>)> {
    let item = state.portfolios.add_to_watchlist(&user_id, &input)?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn remove_symbol(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(symbol): Path<String>,
) -> Result<StatusCode> {
    state.portfolios.remove_from_watchlist(&user_id, &symbol)?;
    Ok(StatusCode::NO_CONTENT)
}
