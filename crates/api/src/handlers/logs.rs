use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LogsView {
    /// Oldest first.
    pub lines: Vec<String>,
}

/// GET /api/v1/logs
pub async fn get_logs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let view = LogsView {
        lines: state.logs.snapshot(),
    };
    Ok(Json(DataResponse { data: view }))
}
