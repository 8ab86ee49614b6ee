pub mod health;
pub mod market;
pub mod portfolios;
pub mod tasks;
pub mod user;
pub mod watchlist;

use crate::AppState;
use axum::Router;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/v1/portfolios", portfolios::router())
        .nest("/api/v1/market-data", market::router())
        .nest("/api/v1/tasks", tasks::router())
        .nest("/api/v1/watchlist", watchlist::router())
}
