use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::{AppError, Result};
use crate::types::TaskStatusResponse;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:task_id", get(get_task))
}

/// GET /tasks/:task_id
///
/// Pure read. Repeated polls of a terminal task return the same payload until
/// it expires; unknown or expired ids are 404.
async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>> {
    state
        .dispatcher
        .poll(&task_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))
}
