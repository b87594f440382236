pub mod grid;
pub mod health;
pub mod worker;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::middleware::auth::DashboardAuth;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /status                     worker status and redacted config (GET)
/// /logs                       recent log lines (GET)
///
/// /worker/reconfigure         apply a config patch (POST)
/// /worker/refresh             re-probe backend capability (POST)
/// /worker/shutdown            drain and stop (POST)
///
/// /grid/user                  Grid account lookup (GET)
/// ```
///
/// Every route requires the dashboard token (see [`DashboardAuth`]).
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(handlers::status::get_status))
        .route("/logs", get(handlers::logs::get_logs))
        .nest("/worker", worker::router())
        .nest("/grid", grid::router())
        .route_layer(axum::middleware::from_extractor_with_state::<
            DashboardAuth,
            AppState,
        >(state))
}
