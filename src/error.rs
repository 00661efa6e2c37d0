//! Error code contract shared by services and routes.
//!
//! Every service error carries a stable machine-readable code so HTTP and
//! websocket clients can branch on it without parsing messages.

use serde::Serialize;

pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    /// Whether a user-visible retry makes sense (transient store/network failure).
    fn retryable(&self) -> bool {
        false
    }
}

/// JSON error body returned by routes.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ErrorBody {
    #[must_use]
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }
}
