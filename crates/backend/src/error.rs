use gridworker_core::prompt::ContextOverflow;

/// Classified failure of one backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Connection refused, DNS failure, reset, etc.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// The request exceeded the configured timeout.
    #[error("Backend request timed out")]
    Timeout,

    /// The backend does not serve the requested model.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The backend answered with something that is not a generation.
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// HTTP 429.
    #[error("Backend rate limit exceeded")]
    RateLimited,

    /// HTTP 5xx.
    #[error("Backend server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// Any other 4xx: the request itself was refused.
    #[error("Backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The prompt could not be fitted into the context window.
    #[error(transparent)]
    ContextOverflow(#[from] ContextOverflow),

    /// The HTTP client could not be constructed.
    #[error("Backend client setup failed: {0}")]
    Setup(String),
}

impl BackendError {
    /// Whether retrying the same request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BackendError::Unreachable(_)
                | BackendError::Timeout
                | BackendError::RateLimited
                | BackendError::Server { .. }
        )
    }

    /// Whether the backend refused the request as invalid rather than
    /// failing to serve it.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BackendError::Rejected { .. } | BackendError::ContextOverflow(_)
        )
    }
}
