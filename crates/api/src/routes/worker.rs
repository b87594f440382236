use axum::routing::post;
use axum::Router;

use crate::handlers::worker;
use crate::state::AppState;

/// Worker control routes mounted at `/worker`.
///
/// ```text
/// POST /reconfigure -> reconfigure
/// POST /refresh     -> refresh
/// POST /shutdown    -> shutdown
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reconfigure", post(worker::reconfigure))
        .route("/refresh", post(worker::refresh))
        .route("/shutdown", post(worker::shutdown))
}
