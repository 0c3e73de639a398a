//! The resilient request client.
//!
//! Handles:
//! - Automatic retries with configurable backoff, bounded by both an
//!   attempt budget and an elapsed-time budget
//! - Rate-limit cooldown with its own bounded budget
//! - Bearer-token refresh on 401
//! - Error classification for retry decisions

use super::rate_limit::RateLimiter;
use super::token::TokenSource;
use crate::error::{Error, Result};
use crate::types::{BackoffType, RetryDecision};
use bytes::Bytes;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Process-wide request counter. The only shared mutable state besides
/// the reqwest connection pool.
static REQUEST_COUNT: AtomicU64 = AtomicU64::new(0);

/// Total requests issued by all clients in this process.
pub fn request_count() -> u64 {
    REQUEST_COUNT.load(Ordering::Relaxed)
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL for relative request paths
    pub base_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// General retry budget (total attempts, first included)
    pub max_attempts: u32,
    /// Initial delay between retry attempts
    pub retry_delay: Duration,
    /// Maximum backoff delay
    pub max_backoff: Duration,
    /// Backoff strategy
    pub backoff_type: BackoffType,
    /// Elapsed-time budget: no retry starts after this much time
    pub give_up_after: Duration,
    /// Throttle budget, distinct from the general retry budget
    pub throttle_retries: u32,
    /// Long fixed cooldown after a recognized rate-limit response
    pub throttle_cooldown: Duration,
    /// How many token refreshes a run of 401s may consume
    pub refresh_retries: u32,
    /// Default headers for all requests
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            max_attempts: 4,
            retry_delay: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
            backoff_type: BackoffType::Exponential,
            give_up_after: Duration::from_secs(300),
            throttle_retries: 3,
            throttle_cooldown: Duration::from_secs(60),
            refresh_retries: 1,
            default_headers: HashMap::new(),
            user_agent: format!("crawlkit/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the general retry budget
    pub fn retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.config.max_attempts = max_attempts;
        self.config.retry_delay = retry_delay;
        self
    }

    /// Set backoff configuration
    pub fn backoff(mut self, backoff_type: BackoffType, max: Duration) -> Self {
        self.config.backoff_type = backoff_type;
        self.config.max_backoff = max;
        self
    }

    /// Set the elapsed-time budget
    pub fn give_up_after(mut self, budget: Duration) -> Self {
        self.config.give_up_after = budget;
        self
    }

    /// Set the throttle budget and cooldown
    pub fn throttle(mut self, retries: u32, cooldown: Duration) -> Self {
        self.config.throttle_retries = retries;
        self.config.throttle_cooldown = cooldown;
        self
    }

    /// Set the token-refresh budget
    pub fn refresh_retries(mut self, retries: u32) -> Self {
        self.config.refresh_retries = retries;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

// ============================================================================
// RequestSpec
// ============================================================================

/// Request body variants. All are cloneable values, so a spec can be
/// fully re-constructed on every retry attempt; a body is never
/// partially replayed.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body
    #[default]
    None,
    /// JSON body
    Json(Value),
    /// Raw bytes (cheaply cloneable)
    Bytes(Bytes),
}

/// An immutable description of one remote call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method
    pub method: Method,
    /// Absolute URL, or a path resolved against the client's base URL
    pub url: String,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: RequestBody,
}

impl RequestSpec {
    /// Create a spec with the given method and URL
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: RequestBody::None,
        }
    }

    /// Create a GET spec
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST spec
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a JSON body
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Set a raw byte body
    #[must_use]
    pub fn bytes(mut self, body: Bytes) -> Self {
        self.body = RequestBody::Bytes(body);
        self
    }

    /// A short rendering of the body for diagnostics
    fn body_preview(&self) -> String {
        match &self.body {
            RequestBody::None => "<empty>".to_string(),
            RequestBody::Json(v) => v.to_string(),
            RequestBody::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

// ============================================================================
// HttpClient
// ============================================================================

/// HTTP client with retry, cooldown, and token refresh
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    limiter: Option<RateLimiter>,
    tokens: Option<Arc<dyn TokenSource>>,
    cancel: CancellationToken,
}

impl HttpClient {
    /// Create a client without pacing
    pub fn new(config: HttpClientConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            config,
            limiter: None,
            tokens: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a client paced by the given limiter.
    ///
    /// The limiter is constructed by the export entry point and passed
    /// down; the client never installs a global one.
    pub fn with_limiter(config: HttpClientConfig, limiter: RateLimiter) -> Self {
        let mut client = Self::new(config);
        client.limiter = Some(limiter);
        client
    }

    /// Attach a bearer-token source
    #[must_use]
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Attach a cancellation token, checked before every attempt and
    /// during every retry sleep
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether pacing is enabled
    pub fn has_limiter(&self) -> bool {
        self.limiter.is_some()
    }

    /// Issue the request once, without retry handling.
    ///
    /// Waits for the limiter, rebuilds the request from the spec, and
    /// applies the current bearer token. Returns the response whatever
    /// its status; classification happens in [`execute`](Self::execute).
    pub async fn send(&self, spec: &RequestSpec) -> Result<Response> {
        if let Some(ref limiter) = self.limiter {
            limiter.wait().await;
        }

        let full_url = self.build_url(&spec.url)?;
        let mut req = self.client.request(spec.method.clone(), &full_url);

        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        for (key, value) in &spec.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if !spec.query.is_empty() {
            req = req.query(&spec.query);
        }
        match &spec.body {
            RequestBody::None => {}
            RequestBody::Json(body) => req = req.json(body),
            RequestBody::Bytes(body) => req = req.body(body.clone()),
        }
        if let Some(ref tokens) = self.tokens {
            let token = tokens.token().await?;
            req = req.bearer_auth(token);
        }

        REQUEST_COUNT.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let outcome = req.send().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(response) => {
                debug!(
                    url = %full_url,
                    status = response.status().as_u16(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request"
                );
                Ok(response)
            }
            Err(e) if e.is_timeout() => Err(Error::Timeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            }),
            Err(e) => Err(Error::Http(e)),
        }
    }

    /// Execute with the configured budgets
    pub async fn execute(&self, spec: &RequestSpec) -> Result<Response> {
        self.execute_with(spec, self.config.max_attempts, self.config.retry_delay)
            .await
    }

    /// Execute with explicit retry budgets.
    ///
    /// Retries while the elapsed time is under `give_up_after` and the
    /// failure is retryable. A 2xx response, or a definitive client
    /// status, short-circuits. Recognized rate-limit responses take the
    /// long-cooldown branch on their own budget; a 401 with a token
    /// source takes the refresh branch. Exhausting the budget returns
    /// the last error.
    pub async fn execute_with(
        &self,
        spec: &RequestSpec,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Response> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut throttle_attempts: u32 = 0;
        let mut refreshes: u32 = 0;
        let mut last_error: Option<Error> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if attempt > 0 && started.elapsed() >= self.config.give_up_after {
                return Err(
                    last_error.unwrap_or(Error::RetriesExhausted { attempts: attempt })
                );
            }

            match self.send(spec).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    // Classification below needs the body; the request is
                    // rebuilt from the spec on every retry anyway.
                    let code = status.as_u16();
                    let body = response.text().await.unwrap_or_default();

                    if looks_rate_limited(code, &body) {
                        if throttle_attempts >= self.config.throttle_retries {
                            return Err(Error::RateLimited {
                                attempts: throttle_attempts,
                            });
                        }
                        throttle_attempts += 1;
                        warn!(
                            status = code,
                            cooldown_ms = self.config.throttle_cooldown.as_millis() as u64,
                            "rate limited, cooling down ({}/{})",
                            throttle_attempts,
                            self.config.throttle_retries
                        );
                        self.sleep_cancellable(self.config.throttle_cooldown).await?;
                        continue;
                    }

                    if code == 401 {
                        if let Some(ref tokens) = self.tokens {
                            if refreshes < self.config.refresh_retries {
                                refreshes += 1;
                                debug!("401 response, refreshing bearer token");
                                tokens.refresh().await?;
                                continue;
                            }
                        }
                        return Err(Error::auth(format!(
                            "401 after {refreshes} token refreshes: {body}"
                        )));
                    }

                    let err = Error::http_status(code, body);
                    attempt += 1;
                    let decision = self.retry_decision(&err, attempt, max_attempts, retry_delay);
                    if !decision.retryable {
                        return Err(err);
                    }
                    warn!(
                        status = code,
                        "request failed, attempt {}/{}, retrying in {:?}",
                        attempt,
                        max_attempts,
                        decision.cooldown
                    );
                    last_error = Some(err);
                    self.sleep_cancellable(decision.cooldown).await?;
                }
                Err(e) => {
                    attempt += 1;
                    let decision = self.retry_decision(&e, attempt, max_attempts, retry_delay);
                    if !decision.retryable {
                        return Err(e);
                    }
                    warn!(
                        error = %e,
                        "network error, attempt {}/{}, retrying in {:?}",
                        attempt,
                        max_attempts,
                        decision.cooldown
                    );
                    last_error = Some(e);
                    self.sleep_cancellable(decision.cooldown).await?;
                }
            }
        }
    }

    /// Execute and parse the body as JSON.
    ///
    /// A non-200/201 status, or an unparsable body, produces a protocol
    /// error carrying both the request and response bodies. The
    /// diagnostic string is built lazily: success paths never format it.
    pub async fn fetch_json<T: DeserializeOwned>(&self, spec: &RequestSpec) -> Result<T> {
        let response = self.execute(spec).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(Error::Http)?;

        let diagnostics = || {
            format!(
                "{} {} returned {status} (request body: {}, response body: {body})",
                spec.method,
                spec.url,
                spec.body_preview()
            )
        };

        if status != 200 && status != 201 {
            return Err(Error::protocol(diagnostics()));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::protocol(format!("unparsable body: {e}: {}", diagnostics())))
    }

    /// Resolve a request URL against the configured base
    fn build_url(&self, path: &str) -> Result<String> {
        if url::Url::parse(path).is_ok() {
            return Ok(path.to_string());
        }
        match &self.config.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let path = path.trim_start_matches('/');
                Ok(format!("{base}/{path}"))
            }
            None => Err(Error::config(format!(
                "relative URL {path:?} with no base_url configured"
            ))),
        }
    }

    /// Classify one failure against the retry budgets.
    ///
    /// `attempt` is the number of attempts already made, the failing
    /// one included. Definitive errors and an exhausted budget are
    /// fatal; anything else retries after the configured backoff.
    pub fn retry_decision(
        &self,
        error: &Error,
        attempt: u32,
        max_attempts: u32,
        initial: Duration,
    ) -> RetryDecision {
        if !error.is_retryable() || attempt >= max_attempts {
            return RetryDecision::fatal();
        }
        RetryDecision::retry_after(
            self.backoff_delay(attempt.saturating_sub(1), initial),
            self.config.give_up_after,
        )
    }

    /// Backoff delay for a given retry ordinal
    pub fn backoff_delay(&self, attempt: u32, initial: Duration) -> Duration {
        let delay = match self.config.backoff_type {
            BackoffType::Constant => initial,
            BackoffType::Linear => initial * (attempt + 1),
            BackoffType::Exponential => initial * 2u32.saturating_pow(attempt),
        };
        std::cmp::min(delay, self.config.max_backoff)
    }

    /// Sleep, waking early (with an error) on cancellation
    async fn sleep_cancellable(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("has_limiter", &self.limiter.is_some())
            .field("has_token_source", &self.tokens.is_some())
            .finish_non_exhaustive()
    }
}

/// Recognize a rate-limit signature on a failed response: 429
/// outright, an error status with a structured `RATE_LIMITED`
/// payload, or a 403 with rate-limit wording (the secondary-limit
/// pattern on source-code hosts). Success statuses never reach
/// classification, so they are never treated as throttled.
fn looks_rate_limited(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    if status >= 400 && body.contains("RATE_LIMITED") {
        return true;
    }
    status == 403 && body.to_ascii_lowercase().contains("rate limit")
}
