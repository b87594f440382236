//! Runs one claimed job against the inference backend.
//!
//! Per job: `claimed -> running -> {succeeded, failed, aborted}`. A job
//! that produced a result (success or failure) is handed back for
//! submission; an aborted job produces nothing.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gridworker_backend::{BackendError, GenerationRequest, InferenceBackend};
use gridworker_core::capability::BackendCapability;
use gridworker_core::job::{Job, JobResult, JobStatus};
use gridworker_core::types::JobId;
use tokio_util::sync::CancellationToken;

/// Retry and deadline tuning for job execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Backend calls per job, the first one included.
    pub max_attempts: u32,
    /// Wait before retrying a transient backend failure.
    pub retry_delay: Duration,
    /// Wait before retrying after the backend rate-limited us.
    pub rate_limit_delay: Duration,
    /// Fixed part of the job deadline.
    pub base_deadline: Duration,
    /// Deadline allowance per requested token.
    pub secs_per_token: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(3),
            rate_limit_delay: Duration::from_secs(5),
            base_deadline: Duration::from_secs(10),
            secs_per_token: 0.5,
        }
    }
}

impl ExecutorConfig {
    /// How long a job may run before it is considered stale.
    pub fn deadline_for(&self, max_length: u32) -> Duration {
        self.base_deadline + Duration::from_secs_f64(f64::from(max_length) * self.secs_per_token)
    }
}

/// Why a job ended without a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Shutdown cancelled the job.
    Cancelled,
    /// The job outlived its deadline.
    DeadlineExceeded(Duration),
    /// The executor task panicked.
    Panicked,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => f.write_str("cancelled"),
            AbortReason::DeadlineExceeded(d) => write!(f, "stale after {}s", d.as_secs()),
            AbortReason::Panicked => f.write_str("executor panicked"),
        }
    }
}

/// Terminal state of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// A result exists and must be submitted exactly once.
    Completed(JobResult),
    /// No result; nothing is submitted.
    Aborted { job_id: JobId, reason: AbortReason },
}

impl ExecutionOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            ExecutionOutcome::Completed(result) => &result.job_id,
            ExecutionOutcome::Aborted { job_id, .. } => job_id,
        }
    }
}

/// Executes jobs against one backend with one capability snapshot.
pub struct JobExecutor {
    backend: Arc<dyn InferenceBackend>,
    capability: Arc<BackendCapability>,
    model_name: String,
    config: ExecutorConfig,
}

impl JobExecutor {
    /// * `model_name` - the model as the backend knows it (not the
    ///   advertised Grid name).
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        capability: Arc<BackendCapability>,
        model_name: String,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            backend,
            capability,
            model_name,
            config,
        }
    }

    /// Run `job` to a terminal state.
    ///
    /// Returns [`ExecutionOutcome::Aborted`] if `cancel` fires or the
    /// deadline passes first.
    pub async fn execute(&self, job: Job, cancel: CancellationToken) -> ExecutionOutcome {
        let deadline = self.config.deadline_for(job.max_length);
        let job_id = job.id.clone();
        tracing::info!(
            job_id = %job_id,
            max_length = job.max_length,
            deadline_secs = deadline.as_secs(),
            "Job running",
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(job_id = %job_id, "Job cancelled");
                ExecutionOutcome::Aborted { job_id, reason: AbortReason::Cancelled }
            }
            result = tokio::time::timeout(deadline, self.run(&job)) => match result {
                Ok(result) => ExecutionOutcome::Completed(result),
                Err(_) => {
                    tracing::warn!(job_id = %job_id, deadline_secs = deadline.as_secs(), "Job is stale, aborting");
                    ExecutionOutcome::Aborted {
                        job_id,
                        reason: AbortReason::DeadlineExceeded(deadline),
                    }
                }
            },
        }
    }

    async fn run(&self, job: &Job) -> JobResult {
        let started = Instant::now();
        let request = GenerationRequest {
            model: self.model_name.clone(),
            prompt: job.prompt.clone(),
            sampling: job.sampling.clone(),
            max_length: job.max_length,
            context_length: job.max_context_length.min(self.capability.max_context_length),
        };

        let mut attempt = 1;
        loop {
            match self.backend.generate(&request).await {
                Ok(generation) if generation.text.trim().is_empty() => {
                    tracing::warn!(job_id = %job.id, "Backend returned an empty generation");
                    return JobResult::failure(
                        job.id.clone(),
                        JobStatus::Failed,
                        "backend returned an empty generation",
                        started.elapsed(),
                    );
                }
                Ok(generation) => {
                    return JobResult::success(
                        job.id.clone(),
                        generation.text,
                        generation.prompt_tokens,
                        generation.completion_tokens,
                        started.elapsed(),
                    );
                }
                Err(e) if e.is_retriable() && attempt < self.config.max_attempts => {
                    let delay = self.retry_delay(&e);
                    tracing::warn!(
                        job_id = %job.id,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Backend call failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    let (status, detail) = classify_failure(&e, attempt);
                    tracing::error!(job_id = %job.id, attempt, error = %e, "Job failed");
                    let mut result = JobResult::failure(job.id.clone(), status, detail, started.elapsed());
                    result.backend_unavailable = e.is_retriable();
                    return result;
                }
            }
        }
    }

    fn retry_delay(&self, error: &BackendError) -> Duration {
        match error {
            BackendError::RateLimited => self.config.rate_limit_delay,
            _ => self.config.retry_delay,
        }
    }
}

/// Map a terminal backend error to the result status and detail.
fn classify_failure(error: &BackendError, attempts: u32) -> (JobStatus, String) {
    if error.is_rejection() {
        (JobStatus::Faulted, error.to_string())
    } else if error.is_retriable() {
        (
            JobStatus::Failed,
            format!("retries exhausted after {attempts} attempts: {error}"),
        )
    } else {
        (JobStatus::Failed, error.to_string())
    }
}
