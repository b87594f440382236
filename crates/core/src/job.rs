//! Claimed jobs and their results.

use std::time::Duration;

use serde::Serialize;

use crate::types::{JobId, Timestamp};

/// `max_length` assumed when the Grid payload does not carry one.
pub const DEFAULT_JOB_MAX_LENGTH: u32 = 80;

/// Sampling temperature assumed when the Grid payload does not carry one.
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Nucleus sampling cutoff assumed when the Grid payload does not carry one.
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Sampling parameters forwarded to the backend untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

/// One unit of inference work claimed from the Grid.
///
/// Immutable once claimed; owned by the executor processing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub sampling: SamplingParams,
    /// Tokens to generate, already clamped to the worker's limit.
    pub max_length: u32,
    /// Context window the requester expects, clamped to the worker's limit.
    pub max_context_length: u32,
    pub model_name: String,
    pub nsfw_allowed: bool,
    pub claimed_at: Timestamp,
}

/// Terminal classification of a job that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    /// Non-retriable backend failure (model missing, retries exhausted,
    /// malformed or empty output).
    Failed,
    /// The backend rejected the request as invalid.
    Faulted,
}

/// Outcome of one job, consumed exactly once by the Grid submit call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub generated_text: Option<String>,
    pub error_detail: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub duration: Duration,
    /// The backend stayed unreachable or overloaded through every retry.
    #[serde(skip)]
    pub backend_unavailable: bool,
}

impl JobResult {
    pub fn success(
        job_id: JobId,
        text: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        duration: Duration,
    ) -> Self {
        Self {
            job_id,
            status: JobStatus::Success,
            generated_text: Some(text),
            error_detail: None,
            prompt_tokens,
            completion_tokens,
            duration,
            backend_unavailable: false,
        }
    }

    pub fn failure(
        job_id: JobId,
        status: JobStatus,
        error_detail: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            job_id,
            status,
            generated_text: None,
            error_detail: Some(error_detail.into()),
            prompt_tokens: 0,
            completion_tokens: 0,
            duration,
            backend_unavailable: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}
