//! Read-only views of the running worker.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use gridworker_core::capability::BackendCapability;
use gridworker_core::config::RedactedConfig;
use gridworker_core::status::WorkerStatus;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub status: WorkerStatus,
    /// The active snapshot, without secrets.
    pub config: RedactedConfig,
    /// `None` while no dispatch loop is running.
    pub capability: Option<BackendCapability>,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let view = StatusView {
        status: state.status.snapshot(),
        config: state.supervisor.config().redacted(),
        capability: state.supervisor.capability().map(|c| (*c).clone()),
    };
    Ok(Json(DataResponse { data: view }))
}
