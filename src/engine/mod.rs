//! Export execution context
//!
//! One [`ExportContext`] is built per `export` (or `onboard_export`)
//! call and handed to the crawler by reference. It owns the request
//! client with its limiter, the session manager, and the cancellation
//! token; crawlers hold no transport or session state of their own.

use crate::http::{HttpClient, HttpClientConfig, RateLimiter, RateLimiterConfig};
use crate::session::{HostApi, SessionManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a crawler needs for one export run
pub struct ExportContext {
    http: HttpClient,
    sessions: SessionManager,
    cancel: CancellationToken,
}

impl ExportContext {
    /// Build a context over a host, wiring the limiter and the
    /// cancellation token into the request client.
    pub fn new(
        host: Arc<dyn HostApi>,
        http_config: HttpClientConfig,
        limiter_config: &RateLimiterConfig,
        cancel: CancellationToken,
    ) -> Self {
        let limiter = RateLimiter::new(limiter_config);
        let http = HttpClient::with_limiter(http_config, limiter)
            .with_cancellation(cancel.clone());
        Self {
            http,
            sessions: SessionManager::new(host),
            cancel,
        }
    }

    /// Build a context around an already-configured client (e.g. one
    /// carrying a token source)
    pub fn with_client(host: Arc<dyn HostApi>, http: HttpClient, cancel: CancellationToken) -> Self {
        Self {
            http,
            sessions: SessionManager::new(host),
            cancel,
        }
    }

    /// Set the record count at which sessions flush
    #[must_use]
    pub fn with_flush_at(mut self, flush_at: usize) -> Self {
        self.sessions = self.sessions.with_flush_at(flush_at);
        self
    }

    /// The request client for this run
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// The session manager for this run
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The run's cancellation token
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ExportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportContext")
            .field("has_limiter", &self.http.has_limiter())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
