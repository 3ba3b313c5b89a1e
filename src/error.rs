//! Error types for classmirror
//!
//! The error kinds here drive the executor's per-item handling: transient
//! provider and network failures are retried, permanent failures terminate
//! the item, unsupported content is skipped, and a corrupt state manifest
//! refuses to start a resume-mode run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for classmirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for classmirror
#[derive(Debug, Error)]
pub enum Error {
    /// Transient provider failure (network hiccup, 5xx) — retried with backoff
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// Permanent provider failure (auth failure, not found, forbidden) — not retried
    #[error("provider error: {0}")]
    PermanentProvider(String),

    /// Provider signalled a rate limit — retried, and the whole executor
    /// throttles for a cooldown window
    #[error("rate limited by provider")]
    RateLimited {
        /// Server-suggested wait before the next attempt, if it sent one
        retry_after: Option<Duration>,
    },

    /// Known content kind with no download strategy — recorded as skipped,
    /// never treated as a failure
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    /// Local I/O error (disk full, permissions) — permanent for the item
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State manifest unreadable — a resume-mode run refuses to start
    #[error("state manifest corrupt at {path}: {reason}")]
    StateCorruption {
        /// Path of the unreadable manifest
        path: PathBuf,
        /// Why it could not be loaded
        reason: String,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g. "dest_root")
        key: Option<String>,
    },

    /// Requested course is not in the provider's enumeration
    #[error("course not found: {0}")]
    CourseNotFound(String),

    /// Run was cancelled before completion
    #[error("run cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a provider error from an HTTP status code, classifying it into
    /// the retryable/permanent/rate-limited kinds the executor distinguishes.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        use reqwest::StatusCode;
        match status {
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after: None },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::PermanentProvider(format!("{context}: auth failure ({status})"))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Error::PermanentProvider(format!("{context}: not found ({status})"))
            }
            s if s.is_server_error() => {
                Error::TransientProvider(format!("{context}: server error ({status})"))
            }
            s => Error::PermanentProvider(format!("{context}: unexpected status {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_429_maps_to_rate_limited() {
        assert!(matches!(
            Error::from_status(StatusCode::TOO_MANY_REQUESTS, "list"),
            Error::RateLimited { .. }
        ));
    }

    #[test]
    fn status_5xx_maps_to_transient() {
        assert!(matches!(
            Error::from_status(StatusCode::SERVICE_UNAVAILABLE, "fetch"),
            Error::TransientProvider(_)
        ));
        assert!(matches!(
            Error::from_status(StatusCode::INTERNAL_SERVER_ERROR, "fetch"),
            Error::TransientProvider(_)
        ));
    }

    #[test]
    fn auth_and_not_found_map_to_permanent() {
        assert!(matches!(
            Error::from_status(StatusCode::UNAUTHORIZED, "list"),
            Error::PermanentProvider(_)
        ));
        assert!(matches!(
            Error::from_status(StatusCode::FORBIDDEN, "list"),
            Error::PermanentProvider(_)
        ));
        assert!(matches!(
            Error::from_status(StatusCode::NOT_FOUND, "fetch"),
            Error::PermanentProvider(_)
        ));
    }

    #[test]
    fn unexpected_status_is_permanent() {
        assert!(matches!(
            Error::from_status(StatusCode::IM_A_TEAPOT, "fetch"),
            Error::PermanentProvider(_)
        ));
    }

    #[test]
    fn config_error_displays_message() {
        let err = Error::Config {
            message: "workers must be positive".into(),
            key: Some("workers".into()),
        };
        assert_eq!(err.to_string(), "configuration error: workers must be positive");
    }
}
