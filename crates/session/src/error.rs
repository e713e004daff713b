//! Backend error type

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Status code reported by the backend when it rejects a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    BadRequest,
    Unauthorized,
    NotFound,
    PreconditionFailed,
    Aborted,
    Unavailable,
    Overloaded,
    Timeout,
    BadSession,
    SessionExpired,
    SessionBusy,
    Internal,
}

impl StatusCode {
    /// Whether the same request may succeed when issued again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StatusCode::Aborted
                | StatusCode::Unavailable
                | StatusCode::Overloaded
                | StatusCode::BadSession
                | StatusCode::SessionBusy
        )
    }

    /// Whether the session that produced this status can no longer be used
    pub fn is_session_lost(&self) -> bool {
        matches!(self, StatusCode::BadSession | StatusCode::SessionExpired)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The backend rejected a request
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Backend error [{status}]: {message}")]
pub struct BackendError {
    pub status: StatusCode,
    pub message: String,
}

impl BackendError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}
