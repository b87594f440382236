use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gridworker_grid::GridError;
use gridworker_worker::SupervisorError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent `{error, code}` JSON
/// bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or wrong dashboard token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// A Grid call made on behalf of the dashboard failed.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// The worker is not currently running a dispatch loop.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),

            AppError::Supervisor(err) => match err {
                SupervisorError::InvalidConfig(inner) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", inner.to_string())
                }
                SupervisorError::Unavailable => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "WORKER_STOPPED",
                    err.to_string(),
                ),
                SupervisorError::Backend(_) | SupervisorError::Grid(_) => {
                    tracing::error!(error = %err, "Worker client error");
                    (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", err.to_string())
                }
            },

            AppError::Grid(err) => {
                tracing::warn!(error = %err, "Grid request failed");
                (StatusCode::BAD_GATEWAY, "GRID_ERROR", err.to_string())
            }

            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg.clone())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
