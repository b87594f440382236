/// Failure of one Grid API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    /// The request never got an HTTP answer (connect, DNS, timeout).
    #[error("Grid transport error: {0}")]
    Transport(String),

    /// HTTP 5xx.
    #[error("Grid server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// HTTP 401/403: the API key was refused.
    #[error("Grid authentication failed ({status})")]
    Auth { status: u16 },

    /// Any other 4xx.
    #[error("Grid rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The Grid answered with a body we could not understand.
    #[error("Invalid Grid response: {0}")]
    Decode(String),

    /// A result for this job id was already handed to `submit`.
    #[error("Duplicate submit for job {0}")]
    DuplicateSubmit(String),

    /// The HTTP client could not be constructed.
    #[error("Grid client setup failed: {0}")]
    Setup(String),
}

impl GridError {
    /// Whether the same call may succeed when repeated later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GridError::Transport(_) | GridError::Server { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, GridError::Auth { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_server_are_retriable() {
        assert!(GridError::Transport("reset".into()).is_retriable());
        assert!(GridError::Server { status: 502, body: String::new() }.is_retriable());
        assert!(!GridError::Auth { status: 401 }.is_retriable());
        assert!(!GridError::Rejected { status: 400, body: String::new() }.is_retriable());
        assert!(!GridError::DuplicateSubmit("j1".into()).is_retriable());
    }
}
