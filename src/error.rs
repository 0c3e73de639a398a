//! Error types for crawlkit
//!
//! This module defines the error hierarchy for the entire runtime.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! The taxonomy mirrors how failures travel through the system:
//! transient network faults are absorbed by the request client,
//! rate-limit and auth failures are retried within their own bounded
//! budgets, and everything else propagates as an explicit error return
//! until the work distributor or an RPC handler decides fatality.

use thiserror::Error;

/// The main error type for crawlkit
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // HTTP Errors (TransientNetwork / RateLimited / AuthExpired / ClientError)
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Rate limited after {attempts} throttle retries")]
    RateLimited { attempts: u32 },

    #[error("Authentication failed: {message}")]
    AuthFailure { message: String },

    #[error("Retry budget exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Protocol Errors (malformed response shape, never retried)
    // ============================================================================
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ============================================================================
    // Pagination Errors
    // ============================================================================
    #[error("Pagination error: {message}")]
    Pagination { message: String },

    // ============================================================================
    // Session / Checkpoint Errors
    // ============================================================================
    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Checkpoint violation: {message}")]
    Checkpoint { message: String },

    // ============================================================================
    // Transport Errors (RPC channel faults)
    // ============================================================================
    #[error("Transport fault: {message}")]
    Transport { message: String },

    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    // ============================================================================
    // Operation Errors
    // ============================================================================
    #[error("Operation not supported: {operation}")]
    NotSupported { operation: String },

    #[error("Crawl run cancelled")]
    Cancelled,

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create an auth failure
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a pagination error
    pub fn pagination(message: impl Into<String>) -> Self {
        Self::Pagination {
            message: message.into(),
        }
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a checkpoint violation
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
        }
    }

    /// Create a transport fault
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a handshake error
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a not-supported error
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Check if this error is retryable by the general retry budget
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Check if an HTTP status code is retryable.
///
/// Definitive client statuses never improve on retry; 5xx and the
/// CDN-specific 52x family might.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504 | 520 | 521 | 522 | 523 | 524)
}

/// Check if an HTTP status is definitive: a retry cannot change the outcome.
pub fn is_definitive_status(status: u16) -> bool {
    matches!(
        status,
        400 | 401 | 403 | 404 | 405 | 409 | 413 | 416 | 422 | 431 | 501
    )
}

/// Result type alias for crawlkit
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure, evaluated only on failure
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::http_status(404, "Not found");
        assert_eq!(err.to_string(), "HTTP 404: Not found");

        let err = Error::checkpoint("done older than start");
        assert_eq!(
            err.to_string(),
            "Checkpoint violation: done older than start"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::Timeout { timeout_ms: 1000 }.is_retryable());
        assert!(!Error::RateLimited { attempts: 3 }.is_retryable());
        assert!(!Error::config("test").is_retryable());
        assert!(!Error::transport("broken pipe").is_retryable());
    }

    #[test_case(500, true; "internal server error")]
    #[test_case(502, true; "bad gateway")]
    #[test_case(503, true; "service unavailable")]
    #[test_case(504, true; "gateway timeout")]
    #[test_case(522, true; "cloudflare connection timed out")]
    #[test_case(400, false; "bad request")]
    #[test_case(401, false; "unauthorized")]
    #[test_case(404, false; "not found")]
    fn test_http_status_retryability(status: u16, retryable: bool) {
        assert_eq!(Error::http_status(status, "").is_retryable(), retryable);
        assert_eq!(is_retryable_status(status), retryable);
    }

    #[test]
    fn test_definitive_statuses() {
        for status in [400, 401, 403, 404, 405, 409, 413, 416, 422, 431] {
            assert!(is_definitive_status(status), "{status} should be definitive");
            assert!(!is_retryable_status(status));
        }
        assert!(!is_definitive_status(500));
        assert!(!is_definitive_status(429));
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::config("inner"));
        let with_context = result.context("outer");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("outer: Configuration error: inner"));
    }

    #[test]
    fn test_lazy_context_not_evaluated_on_success() {
        let result: Result<u32> = Ok(7);
        let value = result
            .with_context(|| unreachable!("closure must not run on success"))
            .unwrap();
        assert_eq!(value, 7);
    }
}
