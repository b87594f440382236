//! OpenAI-compatible `/chat/completions` client (vLLM, SGLang, LM Studio,
//! llama.cpp server, api.openai.com, ...).

use std::time::Duration;

use async_trait::async_trait;
use gridworker_core::config::BackendKind;
use gridworker_core::prompt::{build_messages, estimate_tokens, ChatMessage};
use serde::{Deserialize, Serialize};

use crate::adapter::{Generation, GenerationRequest, InferenceBackend};
use crate::error::BackendError;
use crate::http::{build_client, parse_response, transport_error};

/// HTTP client for one OpenAI-compatible server.
pub struct OpenAiBackend {
    client: reqwest::Client,
    /// Base URL including the version prefix, e.g. `http://host:8000/v1`.
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
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
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    /// vLLM extension.
    max_model_len: Option<u32>,
}

impl OpenAiBackend {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        let messages = build_messages(&request.prompt, request.max_length, request.context_length)?;
        let body = CompletionRequest {
            model: &request.model,
            messages: &messages,
            max_tokens: request.max_length,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            stop: &request.sampling.stop,
            frequency_penalty: request.sampling.frequency_penalty,
            presence_penalty: request.sampling.presence_penalty,
        };

        let response = self
            .authorized(self.client.post(format!("{}/chat/completions", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: CompletionResponse = parse_response(response).await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content.unwrap_or_default())
            .ok_or_else(|| BackendError::MalformedResponse("response has no choices".into()))?;

        let usage = parsed.usage.as_ref();
        let prompt_tokens = usage
            .and_then(|u| u.prompt_tokens)
            .unwrap_or_else(|| messages.iter().map(|m| estimate_tokens(&m.content)).sum());
        let completion_tokens = usage
            .and_then(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(Generation {
            text,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn probe_context_length(&self, model: &str) -> Result<Option<u32>, BackendError> {
        let response = self
            .authorized(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map_err(transport_error)?;

        let models: ModelList = parse_response(response).await?;
        Ok(models
            .data
            .into_iter()
            .find(|m| m.id == model)
            .and_then(|m| m.max_model_len))
    }
}
