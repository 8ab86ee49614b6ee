use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Task pipeline backend, `redis` or `memory`.
    pipeline: &'static str,
}

impl HealthResponse {
    fn ok(pipeline: &'static str) -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            pipeline,
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(state.dispatcher.broker().backend()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health))
        .route("/api/v1", get(health))
}
