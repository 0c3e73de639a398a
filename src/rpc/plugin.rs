//! Plugin-side transport
//!
//! The plugin process binds an ephemeral loopback port, announces it
//! on stdout, and serves the host-to-crawler operations. `init`
//! delivers the host's reverse-channel coordinates; dialing back
//! yields a [`HostHandle`], the live [`HostApi`] the rest of the
//! runtime builds sessions on.

use super::protocol::{
    generate_magic, Ack, ConfigRequest, ExportDoneRequest, ExportGitRepoRequest,
    ExportStartedRequest, Handshake, InitRequest, MutateRequest, MutateResponse,
    OnboardExportRequest, OnboardExportResponse, RpcEnvelope, SendExportedRequest,
    ValidateConfigResponse, WebhookRequest, WebhookResponse, MAGIC_HEADER,
};
use crate::crawler::Crawler;
use crate::engine::ExportContext;
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, RateLimiter, RateLimiterConfig, RequestSpec};
use crate::session::{HostApi, SessionStart, DEFAULT_FLUSH_AT};
use crate::types::{Checkpoint, ExportRecord};
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// ============================================================================
// HostHandle
// ============================================================================

/// The crawler's live connection back to the host
pub struct HostHandle {
    http: HttpClient,
}

impl HostHandle {
    /// Dial the host's crawler-facing server
    pub fn new(host_addr: &str, magic: &str) -> Self {
        let base_url = if host_addr.starts_with("http") {
            host_addr.to_string()
        } else {
            format!("http://{host_addr}")
        };
        let config = HttpClientConfig::builder()
            .base_url(base_url)
            .header(MAGIC_HEADER, magic)
            .build();
        Self {
            http: HttpClient::new(config),
        }
    }

    async fn call<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: Serialize + DeserializeOwned,
    {
        let spec = RequestSpec::post(path).json(serde_json::to_value(request)?);
        let envelope: RpcEnvelope<Resp> = self.http.fetch_json(&spec).await?;
        envelope.into_result()
    }
}

#[async_trait]
impl HostApi for HostHandle {
    async fn export_started(&self, record_type: &str) -> Result<SessionStart> {
        self.call(
            "/export_started",
            &ExportStartedRequest {
                record_type: record_type.to_string(),
            },
        )
        .await
    }

    async fn send_exported(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
        records: Vec<ExportRecord>,
    ) -> Result<()> {
        let _: Ack = self
            .call(
                "/send_exported",
                &SendExportedRequest {
                    session_id: session_id.to_string(),
                    checkpoint: checkpoint.clone(),
                    records,
                },
            )
            .await?;
        Ok(())
    }

    async fn export_done(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let _: Ack = self
            .call(
                "/export_done",
                &ExportDoneRequest {
                    session_id: session_id.to_string(),
                    checkpoint: checkpoint.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn export_git_repo(&self, url: &str) -> Result<()> {
        let _: Ack = self
            .call(
                "/export_git_repo",
                &ExportGitRepoRequest {
                    url: url.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}

// ============================================================================
// PluginServer
// ============================================================================

/// Tunables for the plugin process
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Request client configuration for export runs
    pub http: HttpClientConfig,
    /// Pacing for export runs
    pub limiter: RateLimiterConfig,
    /// Session buffer size
    pub flush_at: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            http: HttpClientConfig::default(),
            limiter: RateLimiterConfig::default(),
            flush_at: DEFAULT_FLUSH_AT,
        }
    }
}

struct PluginState {
    crawler: Arc<dyn Crawler>,
    magic: String,
    config: PluginConfig,
    // Host-to-crawler calls run one at a time.
    call_lock: Mutex<()>,
    host: RwLock<Option<Arc<HostHandle>>>,
    cancel: CancellationToken,
}

/// The plugin's half of the transport: a loopback HTTP server plus the
/// handshake describing how to reach it
pub struct PluginServer {
    handshake: Handshake,
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
}

impl PluginServer {
    /// Bind an ephemeral loopback port for the given crawler
    pub async fn bind(crawler: Arc<dyn Crawler>, config: PluginConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let magic = generate_magic();
        let cancel = CancellationToken::new();

        let state = Arc::new(PluginState {
            crawler,
            magic: magic.clone(),
            config,
            call_lock: Mutex::new(()),
            host: RwLock::new(None),
            cancel: cancel.clone(),
        });

        let router = Router::new()
            .route("/health", get(health))
            .route("/init", post(init))
            .route("/export", post(export))
            .route("/validate_config", post(validate_config))
            .route("/onboard_export", post(onboard_export))
            .route("/mutate", post(mutate))
            .route("/webhook", post(webhook))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                require_magic,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        Ok(Self {
            handshake: Handshake::new(magic, addr),
            listener,
            router,
            cancel,
        })
    }

    /// The handshake announcing this server
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// The bound address
    pub fn addr(&self) -> SocketAddr {
        self.handshake.addr
    }

    /// Token that stops the server and cancels in-flight exports
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve until cancelled
    pub async fn serve(self) -> Result<()> {
        let cancel = self.cancel.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| Error::transport(format!("plugin server error: {e}")))
    }
}

/// Plugin entry point: bind, announce on stdout, serve.
///
/// The handshake line is the only thing this process ever writes to
/// stdout; logging goes to stderr.
pub async fn run(crawler: Arc<dyn Crawler>, config: PluginConfig) -> Result<()> {
    let server = PluginServer::bind(crawler, config).await?;

    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", server.handshake().encode())?;
    stdout.flush()?;
    info!(addr = %server.addr(), "plugin listening");

    server.serve().await
}

// ============================================================================
// Handlers
// ============================================================================

async fn require_magic(
    State(state): State<Arc<PluginState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(MAGIC_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.magic.as_str()) {
        warn!("rejecting request with bad or missing magic");
        return (
            StatusCode::UNAUTHORIZED,
            Json(RpcEnvelope::<Ack>::err(&Error::auth("bad or missing magic"))),
        )
            .into_response();
    }
    next.run(request).await
}

fn respond<T: Serialize + DeserializeOwned>(result: Result<T>) -> Json<RpcEnvelope<T>> {
    match result {
        Ok(data) => Json(RpcEnvelope::ok(data)),
        Err(e) => {
            warn!(error = %e, "rpc operation failed");
            Json(RpcEnvelope::err(&e))
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn init(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<InitRequest>,
) -> Json<RpcEnvelope<Ack>> {
    let handle = Arc::new(HostHandle::new(&req.host_addr, &req.magic));
    *state.host.write().await = Some(handle);
    info!(host_addr = %req.host_addr, "reverse channel established");
    respond(Ok(Ack::default()))
}

async fn export(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<ConfigRequest>,
) -> Json<RpcEnvelope<Ack>> {
    let _serial = state.call_lock.lock().await;
    let outcome = match export_context(&state).await {
        Ok(ctx) => state.crawler.export(&ctx, &req.config).await,
        Err(e) => Err(e),
    };
    respond(outcome.map(|()| Ack::default()))
}

async fn validate_config(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<ConfigRequest>,
) -> Json<RpcEnvelope<ValidateConfigResponse>> {
    let _serial = state.call_lock.lock().await;
    respond(
        state
            .crawler
            .validate_config(&req.config)
            .await
            .map(|errors| ValidateConfigResponse { errors }),
    )
}

async fn onboard_export(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<OnboardExportRequest>,
) -> Json<RpcEnvelope<OnboardExportResponse>> {
    let _serial = state.call_lock.lock().await;
    let outcome = match export_context(&state).await {
        Ok(ctx) => {
            state
                .crawler
                .onboard_export(&ctx, req.object_type, &req.config)
                .await
        }
        Err(e) => Err(e),
    };
    respond(outcome.map(|records| OnboardExportResponse { records }))
}

async fn mutate(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<MutateRequest>,
) -> Json<RpcEnvelope<MutateResponse>> {
    let _serial = state.call_lock.lock().await;
    respond(
        state
            .crawler
            .mutate(&req.action, &req.payload, &req.config)
            .await
            .map(|result| MutateResponse { result }),
    )
}

async fn webhook(
    State(state): State<Arc<PluginState>>,
    Json(req): Json<WebhookRequest>,
) -> Json<RpcEnvelope<WebhookResponse>> {
    let _serial = state.call_lock.lock().await;
    respond(
        state
            .crawler
            .webhook(&req.headers, &req.body, &req.config)
            .await
            .map(|mutated_objects| WebhookResponse { mutated_objects }),
    )
}

/// Build the per-run context: fresh client and limiter over the
/// reverse channel established by `init`.
async fn export_context(state: &PluginState) -> Result<ExportContext> {
    let host: Arc<dyn HostApi> = state
        .host
        .read()
        .await
        .clone()
        .ok_or_else(|| Error::protocol("export requested before init"))?;
    let cancel = state.cancel.child_token();
    let limiter = RateLimiter::new(&state.config.limiter);
    let http = HttpClient::with_limiter(state.config.http.clone(), limiter)
        .with_cancellation(cancel.clone());
    Ok(ExportContext::with_client(host, http, cancel).with_flush_at(state.config.flush_at))
}
