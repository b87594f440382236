use async_trait::async_trait;
use gridworker_core::job::{Job, JobResult};
use serde::{Deserialize, Serialize};

use crate::error::GridError;

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SubmitAck {
    /// Kudos awarded for the job.
    pub reward: f64,
}

/// The account behind the configured API key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub kudos: f64,
    #[serde(default)]
    pub worker_count: u32,
}

/// Job source and result sink.
#[async_trait]
pub trait GridApi: Send + Sync {
    /// Ask for one job matching the worker's advertisement.
    ///
    /// `Ok(None)` means the queue is empty.
    async fn poll(&self) -> Result<Option<Job>, GridError>;

    /// Report the outcome of a previously claimed job.
    async fn submit(&self, result: &JobResult) -> Result<SubmitAck, GridError>;

    /// Look up the account owning the API key.
    async fn find_user(&self) -> Result<GridUser, GridError>;
}
