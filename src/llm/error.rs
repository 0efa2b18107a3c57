//! Transport failures as seen by the turn driver

use thiserror::Error;

/// Failure reported by an [`LlmService`](super::LlmService)
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    /// The provider rejected the request, e.g. over broken tool pairing
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Connection dropped, or a stream ended early
    Network,
    RateLimit,
    ServerError,
    /// Rejected as sent; retrying the same messages cannot help
    InvalidRequest,
}

impl LlmErrorKind {
    /// Whether a caller may resend the same request
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidRequest)
    }
}
