//! Worker control: reconfiguration, capability refresh and shutdown.
//!
//! All three return as soon as the supervisor has accepted the command;
//! draining and restarting happen in the background.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use gridworker_core::config::ConfigPatch;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub accepted: &'static str,
}

/// POST /api/v1/worker/reconfigure
///
/// Validates the patch against the current snapshot. Returns 202 once the
/// supervisor has queued the swap, 400 if the result would be invalid.
pub async fn reconfigure(
    State(state): State<AppState>,
    Json(patch): Json<ConfigPatch>,
) -> AppResult<impl IntoResponse> {
    state.supervisor.reconfigure(&patch).await?;
    tracing::info!("Reconfiguration accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: Accepted {
                accepted: "reconfigure",
            },
        }),
    ))
}

/// POST /api/v1/worker/refresh
pub async fn refresh(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.supervisor.refresh_capability().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: Accepted { accepted: "refresh" },
        }),
    ))
}

/// POST /api/v1/worker/shutdown
///
/// The process exits once the worker has drained.
pub async fn shutdown(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.supervisor.shutdown().await?;
    tracing::info!("Shutdown requested from dashboard");
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: Accepted {
                accepted: "shutdown",
            },
        }),
    ))
}
