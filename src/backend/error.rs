//! Backend error types with broadcast classification.
//!
//! Distinguishes outcomes the broadcast driver absorbs (already known,
//! missing inputs, rate limits, outages) from rejections it must surface.

use std::time::Duration;

/// Error from a backend provider.
#[derive(Debug, Clone)]
pub struct BackendError {
    /// The kind of error
    pub kind: BackendErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message (raw node rejection text where available)
    pub message: String,
    /// Suggested wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Network failure or outage; the directory falls back to the next provider.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    /// Operation not offered by this provider.
    pub fn unsupported(provider: &str, operation: &str) -> Self {
        Self::new(
            BackendErrorKind::Unsupported,
            format!("{} does not support {}", provider, operation),
        )
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidResponse, message)
    }

    /// Build an error from an HTTP response.
    ///
    /// Node rejection text takes precedence over the status code, so a 400
    /// carrying "txn-already-known" is still classified as `AlreadyKnown`.
    pub fn from_response(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let kind = classify_rejection(body).unwrap_or_else(|| classify_http_status(status));
        Self {
            kind,
            status_code: Some(status),
            message: body.to_string(),
            retry_after,
        }
    }

    /// Build an error from a transport failure.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::unavailable(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            Self::unavailable(format!("Connection failed: {}", err))
        } else {
            Self::unavailable(format!("Request failed: {}", err))
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Classification of backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Transaction already in the mempool or chain - treated as success
    AlreadyKnown,
    /// A spent coin is unknown to the node (parent not propagated yet)
    MissingInputs,
    /// Mempool chain too long or HTTP 429 - defer the rest of the pass
    RateLimited,
    /// Network failure or server error - try the next provider
    Unavailable,
    /// Operation not offered by this provider - try the next provider
    Unsupported,
    /// Node rejected the transaction for a reason we do not classify
    Rejected,
    /// Response could not be parsed
    InvalidResponse,
}

impl BackendErrorKind {
    /// Check if this error kind is worth another broadcast pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendErrorKind::MissingInputs
                | BackendErrorKind::RateLimited
                | BackendErrorKind::Unavailable
        )
    }

    /// Check if this error should move on to the next ranked provider.
    pub fn should_fallback(&self) -> bool {
        matches!(
            self,
            BackendErrorKind::Unavailable | BackendErrorKind::Unsupported
        )
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorKind::AlreadyKnown => write!(f, "Already known"),
            BackendErrorKind::MissingInputs => write!(f, "Missing inputs"),
            BackendErrorKind::RateLimited => write!(f, "Rate limited"),
            BackendErrorKind::Unavailable => write!(f, "Backend unavailable"),
            BackendErrorKind::Unsupported => write!(f, "Unsupported operation"),
            BackendErrorKind::Rejected => write!(f, "Rejected"),
            BackendErrorKind::InvalidResponse => write!(f, "Invalid response"),
        }
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> BackendErrorKind {
    match status {
        429 => BackendErrorKind::RateLimited,
        400..=499 => BackendErrorKind::Rejected,
        _ => BackendErrorKind::Unavailable,
    }
}

/// Classify raw node rejection text.
pub fn classify_rejection(message: &str) -> Option<BackendErrorKind> {
    let lower = message.to_lowercase();
    if lower.contains("already in the mempool")
        || lower.contains("txn-already-known")
        || lower.contains("transaction already in block chain")
    {
        Some(BackendErrorKind::AlreadyKnown)
    } else if lower.contains("missing inputs") || lower.contains("missingorspent") {
        Some(BackendErrorKind::MissingInputs)
    } else if lower.contains("too-long-mempool-chain") {
        Some(BackendErrorKind::RateLimited)
    } else {
        None
    }
}
