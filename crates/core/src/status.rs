//! The live worker status record exposed to the dashboard.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::types::{JobId, Timestamp};

/// Coarse lifecycle state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Running, nothing in flight, waiting for the next poll.
    Idle,
    /// A poll request is outstanding.
    Polling,
    /// At least one job is executing.
    Busy,
    /// Fatal-until-reconfigured condition or repeated transport failures.
    Error,
    /// Not serving work.
    Stopped,
}

/// Rolling earnings and throughput figures.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Throughput {
    pub total_kudos: f64,
    pub total_tokens: u64,
    pub kudos_per_hour: f64,
    pub jobs_per_hour: f64,
    pub last_job_at: Option<Timestamp>,
    pub last_job_kudos: f64,
}

/// Snapshot of everything the dashboard shows about the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub active_job_ids: BTreeSet<JobId>,
    pub last_poll_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_aborted: u64,
    pub warnings: u64,
    pub started_at: Timestamp,
    pub uptime_seconds: i64,
    pub throughput: Throughput,
    pub grid_model_name: Option<String>,
    pub backend: Option<String>,
}

impl WorkerStatus {
    pub fn new(started_at: Timestamp) -> Self {
        Self {
            state: WorkerState::Stopped,
            active_job_ids: BTreeSet::new(),
            last_poll_at: None,
            last_error: None,
            jobs_completed: 0,
            jobs_failed: 0,
            jobs_aborted: 0,
            warnings: 0,
            started_at,
            uptime_seconds: 0,
            throughput: Throughput::default(),
            grid_model_name: None,
            backend: None,
        }
    }

    /// Number of jobs currently executing.
    pub fn active_jobs(&self) -> usize {
        self.active_job_ids.len()
    }
}
