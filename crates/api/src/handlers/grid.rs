use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/grid/user
///
/// The Grid account behind the configured API key.
pub async fn get_user(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let grid = state
        .supervisor
        .grid()
        .ok_or_else(|| AppError::Unavailable("worker is not connected to the grid".into()))?;
    let user = grid.find_user().await?;
    Ok(Json(DataResponse { data: user }))
}
