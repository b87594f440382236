use axum::routing::get;
use axum::Router;

use crate::handlers::grid;
use crate::state::AppState;

/// Grid account routes mounted at `/grid`.
pub fn router() -> Router<AppState> {
    Router::new().route("/user", get(grid::get_user))
}
