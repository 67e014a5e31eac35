//! Muninn error types

use std::fmt;

/// Muninn error types
#[derive(Debug, thiserror::Error)]
pub enum MuninnError {
    // Admission errors
    #[error("rate limited (cooldown active: {in_cooldown})")]
    RateLimited { in_cooldown: bool },

    #[error("request cancelled")]
    Cancelled,

    // Backend/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("backend error ({status}): {message}")]
    Api { status: u16, message: String },

    // Stream errors
    #[error("decode error: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The request lock's semaphore was closed.
    ///
    /// Unreachable in practice: [`RequestLock`](crate::RequestLock) owns its
    /// semaphore and never closes it. The variant exists because
    /// `Semaphore::acquire` is fallible by signature.
    #[error("request lock closed")]
    LockClosed,
}

/// Caller-facing failure category.
///
/// The editor layer only distinguishes these four outcomes; the richer
/// [`MuninnError`] variants carry the detail for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    RateLimited,
    Cancelled,
    BackendError,
    DecodeError,
}

impl FailureKind {
    /// Stable wire tag, e.g. `"rate_limited"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Cancelled => "cancelled",
            FailureKind::BackendError => "backend_error",
            FailureKind::DecodeError => "decode_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MuninnError {
    /// Collapse this error into the category reported to callers.
    pub fn kind(&self) -> FailureKind {
        match self {
            MuninnError::RateLimited { .. } => FailureKind::RateLimited,
            MuninnError::Cancelled => FailureKind::Cancelled,
            MuninnError::Decode(_) | MuninnError::Json(_) => FailureKind::DecodeError,
            MuninnError::Http(_)
            | MuninnError::Api { .. }
            | MuninnError::Configuration(_)
            | MuninnError::LockClosed => FailureKind::BackendError,
        }
    }

    /// Whether a caller could reasonably try the same request again later.
    ///
    /// The pipeline itself never retries; this is a hint for the UI layer.
    pub fn is_transient(&self) -> bool {
        match self {
            MuninnError::RateLimited { .. } | MuninnError::Http(_) => true,
            MuninnError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for MuninnError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => MuninnError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => MuninnError::Http(err.to_string()),
        }
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
