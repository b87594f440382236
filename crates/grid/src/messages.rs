//! Wire types of the Grid `/v2` text endpoints.

use gridworker_core::job::{
    Job, JobResult, JobStatus, SamplingParams, DEFAULT_JOB_MAX_LENGTH, DEFAULT_TEMPERATURE,
    DEFAULT_TOP_P,
};
use gridworker_core::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Identifies this worker implementation to the Grid.
pub const BRIDGE_AGENT: &str =
    "AI Horde Worker:1.0.0:https://github.com/AIPowerGrid/text-worker-bridge";

/// Body of `POST /v2/generate/text/pop`.
#[derive(Debug, Clone, Serialize)]
pub struct PopRequest {
    pub name: String,
    pub models: Vec<String>,
    pub max_length: u32,
    pub max_context_length: u32,
    pub priority_usernames: Vec<String>,
    pub threads: usize,
    pub nsfw: bool,
    pub bridge_agent: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

/// Answer to a pop. `id` is absent when there is no work.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PopResponse {
    pub id: Option<String>,
    #[serde(default)]
    pub payload: PopPayload,
    pub model: Option<String>,
}

/// Generation parameters chosen by the requester.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PopPayload {
    #[serde(default)]
    pub prompt: String,
    pub max_length: Option<u32>,
    pub max_context_length: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop_sequence: Vec<String>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

/// The worker-side limits a claimed job is clamped to.
#[derive(Debug, Clone)]
pub struct JobLimits {
    pub max_length: u32,
    pub max_context_length: u32,
    pub model_name: String,
    pub nsfw: bool,
}

impl PopResponse {
    /// Turn a pop answer into a [`Job`], or `None` when no job was handed out.
    pub fn into_job(self, limits: &JobLimits, claimed_at: Timestamp) -> Option<Job> {
        let id = self.id.filter(|id| !id.is_empty())?;
        let payload = self.payload;
        let max_length = payload
            .max_length
            .unwrap_or(DEFAULT_JOB_MAX_LENGTH)
            .clamp(1, limits.max_length.max(1));
        let max_context_length = payload
            .max_context_length
            .unwrap_or(limits.max_context_length)
            .min(limits.max_context_length);

        Some(Job {
            id,
            prompt: payload.prompt,
            sampling: SamplingParams {
                temperature: Some(payload.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
                top_p: Some(payload.top_p.unwrap_or(DEFAULT_TOP_P)),
                stop: payload.stop_sequence,
                frequency_penalty: payload.frequency_penalty,
                presence_penalty: payload.presence_penalty,
            },
            max_length,
            max_context_length,
            model_name: self.model.unwrap_or_else(|| limits.model_name.clone()),
            nsfw_allowed: limits.nsfw,
            claimed_at,
        })
    }
}

/// Body of `POST /v2/generate/text/submit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitRequest<'a> {
    pub id: &'a str,
    pub generation: &'a str,
    pub seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'static str>,
}

impl<'a> From<&'a JobResult> for SubmitRequest<'a> {
    fn from(result: &'a JobResult) -> Self {
        let state = match result.status {
            JobStatus::Success => None,
            JobStatus::Failed | JobStatus::Faulted => Some("faulted"),
        };
        Self {
            id: &result.job_id,
            generation: result.generated_text.as_deref().unwrap_or(""),
            seed: 0,
            state,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub reward: f64,
}
