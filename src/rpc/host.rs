//! Host-side transport
//!
//! [`HostServer`] serves the crawler-to-host operations over a backing
//! [`HostApi`] implementation (normally a collector). [`PluginHandle`]
//! launches the plugin subprocess, consumes its handshake line, and
//! exposes the host-to-crawler operations as plain method calls.

use super::protocol::{
    Ack, ConfigRequest, ExportDoneRequest, ExportGitRepoRequest, ExportStartedRequest, Handshake,
    InitRequest, MutateRequest, MutateResponse, OnboardExportRequest, OnboardExportResponse,
    RpcEnvelope, SendExportedRequest, ValidateConfigResponse, WebhookRequest, WebhookResponse,
    MAGIC_HEADER,
};
use crate::crawler::ObjectType;
use crate::error::{Error, Result, ResultExt};
use crate::http::{HttpClient, HttpClientConfig, RequestSpec};
use crate::session::{HostApi, SessionStart};
use crate::types::{ExportRecord, JsonValue, StringMap};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// How long the host waits for the plugin's handshake line
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// HostServer
// ============================================================================

struct HostState {
    host: Arc<dyn HostApi>,
    magic: String,
}

/// The host's crawler-facing loopback server
pub struct HostServer {
    addr: SocketAddr,
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
}

impl HostServer {
    /// Bind an ephemeral loopback port over the given host
    /// implementation, validating requests against `magic`
    pub async fn bind(host: Arc<dyn HostApi>, magic: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let cancel = CancellationToken::new();

        let state = Arc::new(HostState {
            host,
            magic: magic.into(),
        });

        let router = Router::new()
            .route("/health", get(health))
            .route("/export_started", post(export_started))
            .route("/send_exported", post(send_exported))
            .route("/export_done", post(export_done))
            .route("/export_git_repo", post(export_git_repo))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                require_magic,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        Ok(Self {
            addr,
            listener,
            router,
            cancel,
        })
    }

    /// The bound address, handed to the plugin in `init`
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Token that stops the server
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve until cancelled
    pub async fn serve(self) -> Result<()> {
        let cancel = self.cancel.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| Error::transport(format!("host server error: {e}")))
    }

    /// Serve on a background task
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(self.serve())
    }
}

async fn require_magic(
    State(state): State<Arc<HostState>>,
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
            warn!(error = %e, "host operation failed");
            Json(RpcEnvelope::err(&e))
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn export_started(
    State(state): State<Arc<HostState>>,
    Json(req): Json<ExportStartedRequest>,
) -> Json<RpcEnvelope<SessionStart>> {
    respond(state.host.export_started(&req.record_type).await)
}

async fn send_exported(
    State(state): State<Arc<HostState>>,
    Json(req): Json<SendExportedRequest>,
) -> Json<RpcEnvelope<Ack>> {
    respond(
        state
            .host
            .send_exported(&req.session_id, &req.checkpoint, req.records)
            .await
            .map(|()| Ack::default()),
    )
}

async fn export_done(
    State(state): State<Arc<HostState>>,
    Json(req): Json<ExportDoneRequest>,
) -> Json<RpcEnvelope<Ack>> {
    respond(
        state
            .host
            .export_done(&req.session_id, &req.checkpoint)
            .await
            .map(|()| Ack::default()),
    )
}

async fn export_git_repo(
    State(state): State<Arc<HostState>>,
    Json(req): Json<ExportGitRepoRequest>,
) -> Json<RpcEnvelope<Ack>> {
    respond(
        state
            .host
            .export_git_repo(&req.url)
            .await
            .map(|()| Ack::default()),
    )
}

// ============================================================================
// PluginHandle
// ============================================================================

/// The host's connection to one plugin.
///
/// Owns the subprocess when launched via [`PluginHandle::spawn`]; the
/// child is killed when the handle drops.
pub struct PluginHandle {
    http: HttpClient,
    handshake: Handshake,
    child: Option<Child>,
}

impl PluginHandle {
    /// Launch the plugin subprocess and consume its handshake line.
    ///
    /// Fails fast on a missing or malformed handshake and on a
    /// protocol version this host does not speak.
    pub async fn spawn(mut command: Command) -> Result<Self> {
        command.stdout(Stdio::piped());
        let mut child = command
            .spawn()
            .context("failed to spawn plugin subprocess")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::handshake("plugin stdout not captured"))?;

        let mut lines = tokio::io::BufReader::new(stdout).lines();
        let line = tokio::time::timeout(HANDSHAKE_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| Error::handshake("timed out waiting for handshake line"))??
            .ok_or_else(|| Error::handshake("plugin exited before handshake"))?;

        let handshake = Handshake::parse(&line)?;
        handshake.ensure_version()?;
        info!(addr = %handshake.addr, "plugin handshake accepted");

        let mut handle = Self::connect(handshake);
        handle.child = Some(child);
        Ok(handle)
    }

    /// Connect to an already-running plugin (in-process tests)
    pub fn connect(handshake: Handshake) -> Self {
        let config = HttpClientConfig::builder()
            .base_url(format!("http://{}", handshake.addr))
            .header(MAGIC_HEADER, &handshake.magic)
            .build();
        Self {
            http: HttpClient::new(config),
            handshake,
            child: None,
        }
    }

    /// The plugin's address
    pub fn addr(&self) -> SocketAddr {
        self.handshake.addr
    }

    /// The shared magic from the handshake
    pub fn magic(&self) -> &str {
        &self.handshake.magic
    }

    /// Hand the plugin its reverse-channel coordinates
    pub async fn init(&self, host_addr: SocketAddr) -> Result<()> {
        let _: Ack = self
            .call(
                "/init",
                &InitRequest {
                    host_addr: host_addr.to_string(),
                    magic: self.handshake.magic.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Run a full or incremental export
    pub async fn export(&self, config: &JsonValue) -> Result<()> {
        let _: Ack = self
            .call(
                "/export",
                &ConfigRequest {
                    config: config.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Validate a crawler configuration
    pub async fn validate_config(&self, config: &JsonValue) -> Result<Vec<String>> {
        let response: ValidateConfigResponse = self
            .call(
                "/validate_config",
                &ConfigRequest {
                    config: config.clone(),
                },
            )
            .await?;
        Ok(response.errors)
    }

    /// Export one object family ahead of a full crawl, returning the
    /// onboarded records
    pub async fn onboard_export(
        &self,
        object_type: ObjectType,
        config: &JsonValue,
    ) -> Result<Vec<ExportRecord>> {
        let response: OnboardExportResponse = self
            .call(
                "/onboard_export",
                &OnboardExportRequest {
                    object_type,
                    config: config.clone(),
                },
            )
            .await?;
        Ok(response.records)
    }

    /// Perform a write action against the remote service
    pub async fn mutate(
        &self,
        action: &str,
        payload: &JsonValue,
        config: &JsonValue,
    ) -> Result<JsonValue> {
        let response: MutateResponse = self
            .call(
                "/mutate",
                &MutateRequest {
                    action: action.to_string(),
                    payload: payload.clone(),
                    config: config.clone(),
                },
            )
            .await?;
        Ok(response.result)
    }

    /// Forward a webhook delivery to the crawler, returning the
    /// objects it mutated
    pub async fn webhook(
        &self,
        headers: &StringMap,
        body: &JsonValue,
        config: &JsonValue,
    ) -> Result<Vec<ExportRecord>> {
        let response: WebhookResponse = self
            .call(
                "/webhook",
                &WebhookRequest {
                    headers: headers.clone(),
                    body: body.clone(),
                    config: config.clone(),
                },
            )
            .await?;
        Ok(response.mutated_objects)
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

impl Drop for PluginHandle {
    fn drop(&mut self) {
        if let Some(child) = &mut self.child {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to kill plugin subprocess");
            }
        }
    }
}
