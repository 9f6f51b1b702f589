use thiserror::Error;

/// Failures reported by a [`Transport`](crate::transport::Transport).
///
/// The pipeline never reinterprets these; they reach the caller wrapped in
/// [`PipeError::Transport`] exactly as the transport produced them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Middleware not found: {0}")]
    MiddlewareNotFound(String),

    #[error("Missing path parameter '{param}' for '{template}'")]
    MissingPathParam { param: String, template: String },

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Coalesced request failed: {0}")]
    CoalescedFailure(String),

    #[error("Cancelled before step '{0}'")]
    Cancelled(String),

    #[error("Invalid service: {0}")]
    InvalidService(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Handler '{step}' failed: {reason}")]
    Handler { step: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PipeError {
    /// Build a handler failure; the usual way for middleware to stop the pipeline.
    pub fn handler(step: impl Into<String>, reason: impl Into<String>) -> Self {
        PipeError::Handler {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Duplicate rejections are recoverable; callers may ignore or retry them.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, PipeError::DuplicateRequest(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipeError::Cancelled(_) | PipeError::Transport(TransportError::Cancelled)
        )
    }
}
