//! Ollama native API client.
//!
//! Generation goes through `POST /api/chat` with streaming disabled;
//! the context window is probed via `POST /api/show`.

use std::time::Duration;

use async_trait::async_trait;
use gridworker_core::config::BackendKind;
use gridworker_core::prompt::{build_messages, estimate_tokens, ChatMessage};
use serde::{Deserialize, Serialize};

use crate::adapter::{Generation, GenerationRequest, InferenceBackend};
use crate::error::BackendError;
use crate::http::{build_client, parse_response, transport_error};

/// HTTP client for a single Ollama instance.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: Options<'a>,
}

#[derive(Debug, Serialize)]
struct Options<'a> {
    num_predict: u32,
    num_ctx: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ShowResponse {
    #[serde(default)]
    model_info: serde_json::Map<String, serde_json::Value>,
}

impl OllamaBackend {
    /// * `base_url` - e.g. `http://127.0.0.1:11434`.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        let messages = build_messages(&request.prompt, request.max_length, request.context_length)?;
        let body = ChatRequest {
            model: &request.model,
            messages: &messages,
            stream: false,
            options: Options {
                num_predict: request.max_length,
                num_ctx: request.context_length,
                temperature: request.sampling.temperature,
                top_p: request.sampling.top_p,
                stop: &request.sampling.stop,
                frequency_penalty: request.sampling.frequency_penalty,
                presence_penalty: request.sampling.presence_penalty,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: ChatResponse = parse_response(response).await?;
        let text = parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| BackendError::MalformedResponse("response has no message".into()))?;

        let prompt_tokens = parsed
            .prompt_eval_count
            .unwrap_or_else(|| messages.iter().map(|m| estimate_tokens(&m.content)).sum());
        let completion_tokens = parsed.eval_count.unwrap_or_else(|| estimate_tokens(&text));

        Ok(Generation {
            text,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn probe_context_length(&self, model: &str) -> Result<Option<u32>, BackendError> {
        let response = self
            .client
            .post(format!("{}/api/show", self.base_url))
            .json(&serde_json::json!({ "name": model }))
            .send()
            .await
            .map_err(transport_error)?;

        let show: ShowResponse = parse_response(response).await?;
        Ok(context_length_from_model_info(&show.model_info))
    }
}

/// Ollama reports the window as `<architecture>.context_length`.
fn context_length_from_model_info(info: &serde_json::Map<String, serde_json::Value>) -> Option<u32> {
    info.iter()
        .find(|(key, _)| key.ends_with(".context_length"))
        .and_then(|(_, value)| value.as_u64())
        .and_then(|v| u32::try_from(v).ok())
}
