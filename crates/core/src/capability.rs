use serde::Serialize;

use crate::config::{BackendKind, WorkerConfig};

/// What the local backend can serve, fixed for one operating cycle.
///
/// Built at startup and on every reconfiguration; shared read-only
/// between the dispatch loop and the executors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendCapability {
    pub backend_type: BackendKind,
    pub endpoint: String,
    pub max_context_length: u32,
    pub concurrency_limit: usize,
}

impl BackendCapability {
    /// Capability from configuration alone (no probe result).
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            backend_type: config.backend_kind,
            endpoint: config.backend_url.clone(),
            max_context_length: config.max_context_length,
            concurrency_limit: config.max_threads.max(1),
        }
    }

    /// Narrow the context window to what the backend actually reports.
    ///
    /// A probe never widens the configured limit.
    pub fn with_probed_context(mut self, probed: Option<u32>) -> Self {
        if let Some(ctx) = probed.filter(|c| *c > 0) {
            self.max_context_length = self.max_context_length.min(ctx);
        }
        self
    }
}
