//! Response classification shared by both backend variants.

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::BackendError;

/// Longest body excerpt kept in an error.
const MAX_BODY_EXCERPT: usize = 300;

/// Build the HTTP client for a backend with the request timeout applied.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Setup(e.to_string()))
}

/// Map a transport-level failure into the backend taxonomy.
pub(crate) fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else if err.is_decode() {
        BackendError::MalformedResponse(err.to_string())
    } else {
        BackendError::Unreachable(err.to_string())
    }
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or the classified error on failure.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(classify_status(status, &body))
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BackendError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::MalformedResponse(e.to_string()))
}

/// Classify a non-success HTTP status and its body.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let message = error_message(body);
    match status.as_u16() {
        404 => BackendError::ModelNotFound(message),
        429 => BackendError::RateLimited,
        400 if looks_like_missing_model(&message) => BackendError::ModelNotFound(message),
        code @ 500..=599 => BackendError::Server { status: code, body: message },
        code => BackendError::Rejected { status: code, body: message },
    }
}

/// Pull the human-readable message out of `{"error": "..."}` or
/// `{"error": {"message": "..."}}` bodies, falling back to the raw text.
fn error_message(body: &str) -> String {
    let extracted = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            err.as_str()
                .map(str::to_string)
                .or_else(|| err.get("message")?.as_str().map(str::to_string))
        });
    let message = extracted.unwrap_or_else(|| body.trim().to_string());
    message.chars().take(MAX_BODY_EXCERPT).collect()
}

fn looks_like_missing_model(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("model") && (lower.contains("not found") || lower.contains("does not exist"))
}
