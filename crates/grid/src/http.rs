use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gridworker_core::backoff::{Backoff, BackoffPolicy};
use gridworker_core::config::WorkerConfig;
use gridworker_core::job::{Job, JobResult};
use reqwest::StatusCode;

use crate::client::{GridApi, GridUser, SubmitAck};
use crate::error::GridError;
use crate::ledger::SubmitLedger;
use crate::messages::{JobLimits, PopRequest, PopResponse, SubmitRequest, SubmitResponse, BRIDGE_AGENT};

/// Timeout for any single Grid request.
const GRID_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Attempts per submit call, the first one included.
pub const DEFAULT_SUBMIT_ATTEMPTS: u32 = 3;

/// Longest body excerpt kept in an error.
const MAX_BODY_EXCERPT: usize = 200;

fn default_submit_policy() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_secs(3),
        max_delay: Duration::from_secs(10),
        multiplier: 2.0,
        jitter: 0.25,
    }
}

/// [`GridApi`] over the Grid REST API.
pub struct HttpGridClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    advertisement: PopRequest,
    limits: JobLimits,
    submit_policy: BackoffPolicy,
    submit_attempts: u32,
    ledger: Mutex<SubmitLedger>,
}

impl HttpGridClient {
    /// Build a client advertising the worker described by `config`.
    pub fn new(config: &WorkerConfig) -> Result<Self, GridError> {
        let client = reqwest::Client::builder()
            .timeout(GRID_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GridError::Setup(e.to_string()))?;

        let grid_model = config.grid_model_name();
        let advertisement = PopRequest {
            name: config.worker_name.clone(),
            models: vec![grid_model.clone()],
            max_length: config.max_length,
            max_context_length: config.max_context_length,
            priority_usernames: Vec::new(),
            threads: config.max_threads,
            nsfw: config.nsfw,
            bridge_agent: BRIDGE_AGENT,
            wallet_address: config.wallet_address.clone(),
        };
        let limits = JobLimits {
            max_length: config.max_length,
            max_context_length: config.max_context_length,
            model_name: grid_model,
            nsfw: config.nsfw,
        };

        Ok(Self {
            client,
            base_url: config.grid_api_url.trim_end_matches('/').to_string(),
            api_key: config.grid_api_key.clone(),
            advertisement,
            limits,
            submit_policy: default_submit_policy(),
            submit_attempts: DEFAULT_SUBMIT_ATTEMPTS,
            ledger: Mutex::new(SubmitLedger::default()),
        })
    }

    /// Override how failed submits are retried.
    pub fn with_submit_retry(mut self, policy: BackoffPolicy, attempts: u32) -> Self {
        self.submit_policy = policy;
        self.submit_attempts = attempts.max(1);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Record `job_id` as submitted. Returns `false` for a repeat.
    fn claim_submission(&self, job_id: &str) -> bool {
        match self.ledger.lock() {
            Ok(mut ledger) => ledger.insert(job_id),
            Err(poisoned) => poisoned.into_inner().insert(job_id),
        }
    }

    async fn submit_once(&self, body: &SubmitRequest<'_>) -> Result<SubmitAck, GridError> {
        let response = self
            .client
            .post(self.url("/v2/generate/text/submit"))
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: SubmitResponse = parse_response(response).await?;
        Ok(SubmitAck {
            reward: parsed.reward,
        })
    }
}

#[async_trait]
impl GridApi for HttpGridClient {
    async fn poll(&self) -> Result<Option<Job>, GridError> {
        let response = self
            .client
            .post(self.url("/v2/generate/text/pop"))
            .header("apikey", &self.api_key)
            .json(&self.advertisement)
            .send()
            .await
            .map_err(transport_error)?;

        let pop: PopResponse = parse_response(response).await?;
        let job = pop.into_job(&self.limits, Utc::now());
        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, max_length = job.max_length, "Job claimed");
        }
        Ok(job)
    }

    async fn submit(&self, result: &JobResult) -> Result<SubmitAck, GridError> {
        if !self.claim_submission(&result.job_id) {
            tracing::warn!(job_id = %result.job_id, "Duplicate submit suppressed");
            return Err(GridError::DuplicateSubmit(result.job_id.clone()));
        }

        let body = SubmitRequest::from(result);
        let mut backoff = Backoff::new(self.submit_policy.clone());
        let mut attempt = 1;
        loop {
            match self.submit_once(&body).await {
                Ok(ack) => {
                    tracing::debug!(job_id = %result.job_id, reward = ack.reward, "Result submitted");
                    return Ok(ack);
                }
                Err(e) if e.is_retriable() && attempt < self.submit_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        job_id = %result.job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Submit failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn find_user(&self) -> Result<GridUser, GridError> {
        let response = self
            .client
            .get(self.url("/v2/find_user"))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        parse_response(response).await
    }
}

// ---- private helpers ----

fn transport_error(err: reqwest::Error) -> GridError {
    if err.is_decode() {
        GridError::Decode(err.to_string())
    } else {
        GridError::Transport(err.to_string())
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GridError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(classify_status(status, &body));
    }
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| GridError::Decode(e.to_string()))
}

fn classify_status(status: StatusCode, body: &str) -> GridError {
    let body: String = body.trim().chars().take(MAX_BODY_EXCERPT).collect();
    match status.as_u16() {
        code @ (401 | 403) => GridError::Auth { status: code },
        code @ 500..=599 => GridError::Server { status: code, body },
        code => GridError::Rejected { status: code, body },
    }
}
