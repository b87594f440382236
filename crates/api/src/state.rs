use std::sync::Arc;

use gridworker_events::StatusWatch;
use gridworker_worker::SupervisorHandle;

use crate::config::ServerConfig;
use crate::logs::LogBuffer;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; every field is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Dashboard server settings, including the access token.
    pub config: Arc<ServerConfig>,
    /// Control surface of the running worker.
    pub supervisor: SupervisorHandle,
    /// Latest published worker status.
    pub status: StatusWatch,
    /// Recent log lines.
    pub logs: LogBuffer,
}
