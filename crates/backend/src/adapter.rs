use std::sync::Arc;

use async_trait::async_trait;
use gridworker_core::capability::BackendCapability;
use gridworker_core::config::{BackendKind, WorkerConfig};
use gridworker_core::job::SamplingParams;

use crate::error::BackendError;
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;

/// Everything a backend needs to run one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub sampling: SamplingParams,
    pub max_length: u32,
    /// Context window the whole request (prompt + generation) must fit in.
    pub context_length: u32,
}

/// Text produced by a backend, with token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A local inference backend.
///
/// Implementations are stateless per call; the only side effect is the
/// outbound HTTP request.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Base URL requests are sent to.
    fn endpoint(&self) -> &str;

    /// Run one generation.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError>;

    /// Ask the backend for the context length of `model`.
    ///
    /// `Ok(None)` means the backend answered but does not report one.
    async fn probe_context_length(&self, model: &str) -> Result<Option<u32>, BackendError>;
}

/// Construct the backend variant selected by `config`.
pub fn build_backend(config: &WorkerConfig) -> Result<Arc<dyn InferenceBackend>, BackendError> {
    let backend: Arc<dyn InferenceBackend> = match config.backend_kind {
        BackendKind::Ollama => Arc::new(OllamaBackend::new(
            config.backend_url.clone(),
            config.backend_timeout,
        )?),
        BackendKind::OpenAi => Arc::new(OpenAiBackend::new(
            config.backend_url.clone(),
            config.backend_api_key.clone(),
            config.backend_timeout,
        )?),
    };
    Ok(backend)
}

/// Build the [`BackendCapability`] for `config`, narrowing the context
/// window with whatever the backend reports.
///
/// A failed probe is logged and the configured values are used.
pub async fn probe_capability(
    backend: &dyn InferenceBackend,
    config: &WorkerConfig,
) -> BackendCapability {
    let probed = match backend.probe_context_length(&config.model_name).await {
        Ok(ctx) => {
            tracing::info!(
                backend = %backend.kind(),
                model = %config.model_name,
                context_length = ?ctx,
                "Backend capability probed",
            );
            ctx
        }
        Err(e) => {
            tracing::warn!(
                backend = %backend.kind(),
                endpoint = backend.endpoint(),
                error = %e,
                "Context length probe failed, using configured value",
            );
            None
        }
    };
    BackendCapability::from_config(config).with_probed_context(probed)
}
