//! Wire protocol: handshake line, shared magic, and request/response
//! shapes for both RPC directions.
//!
//! The plugin binds an ephemeral loopback port and announces it with a
//! single stdout line `CRAWLKIT|<version>|<magic>|<addr>`. The magic is
//! a per-launch rendezvous token carried by every request in the
//! [`MAGIC_HEADER`] header; it pairs the two endpoints, it is not a
//! credential.

use crate::crawler::ObjectType;
use crate::error::{Error, Result};
use crate::types::{Checkpoint, ExportRecord, JsonValue, StringMap};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Version of the handshake and wire shapes
pub const PROTOCOL_VERSION: u32 = 1;

/// First field of the handshake line
pub const HANDSHAKE_PREFIX: &str = "CRAWLKIT";

/// Header carrying the shared magic on every RPC request
pub const MAGIC_HEADER: &str = "x-crawlkit-magic";

static MAGIC_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a per-launch rendezvous token
pub fn generate_magic() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let n = MAGIC_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{nanos:x}-{n:x}", std::process::id())
}

// ============================================================================
// Handshake
// ============================================================================

/// The parsed handshake line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol version the plugin speaks
    pub version: u32,
    /// Shared rendezvous token
    pub magic: String,
    /// Address the plugin is listening on
    pub addr: SocketAddr,
}

impl Handshake {
    /// Create a handshake for the current protocol version
    pub fn new(magic: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            magic: magic.into(),
            addr,
        }
    }

    /// Render the stdout line
    pub fn encode(&self) -> String {
        format!(
            "{HANDSHAKE_PREFIX}|{}|{}|{}",
            self.version, self.magic, self.addr
        )
    }

    /// Parse a handshake line
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim().split('|').collect();
        let [prefix, version, magic, addr] = parts[..] else {
            return Err(Error::handshake(format!(
                "expected 4 |-separated fields, got {:?}",
                line.trim()
            )));
        };
        if prefix != HANDSHAKE_PREFIX {
            return Err(Error::handshake(format!("unknown prefix {prefix:?}")));
        }
        let version: u32 = version
            .parse()
            .map_err(|_| Error::handshake(format!("unparsable version {version:?}")))?;
        if magic.is_empty() {
            return Err(Error::handshake("empty magic"));
        }
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| Error::handshake(format!("unparsable address {addr:?}")))?;
        Ok(Self {
            version,
            magic: magic.to_string(),
            addr,
        })
    }

    /// Fail fast on a version this build does not speak
    pub fn ensure_version(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(Error::handshake(format!(
                "plugin speaks protocol {} but this host speaks {PROTOCOL_VERSION}",
                self.version
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Response envelope
// ============================================================================

/// A serializable rendering of an [`Error`] crossing the boundary.
///
/// Only the innermost message travels; rich context stays in the
/// originating process's logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Coarse classification used to rebuild the error on the far side
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

/// Response wrapper for every RPC endpoint.
///
/// Application failures travel as a 200 with `success: false`;
/// non-200 statuses are reserved for the transport layer itself.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcEnvelope<T> {
    /// Whether the call succeeded
    pub success: bool,
    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Failure details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl<T: Serialize + DeserializeOwned> RpcEnvelope<T> {
    /// A successful envelope
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed envelope
    pub fn err(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(RpcError {
                kind: error_kind(error).to_string(),
                message: error.to_string(),
            }),
        }
    }

    /// Unwrap the envelope back into a `Result`
    pub fn into_result(self) -> Result<T> {
        if self.success {
            return self
                .data
                .ok_or_else(|| Error::protocol("success envelope with no data"));
        }
        let error = self
            .error
            .ok_or_else(|| Error::protocol("failure envelope with no error"))?;
        Err(rebuild_error(&error.kind, error.message))
    }
}

fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::NotSupported { .. } => "not_supported",
        Error::Checkpoint { .. } => "checkpoint",
        Error::Session { .. } => "session",
        Error::AuthFailure { .. } => "auth",
        Error::RateLimited { .. } => "rate_limited",
        Error::Cancelled => "cancelled",
        _ => "other",
    }
}

fn rebuild_error(kind: &str, message: String) -> Error {
    match kind {
        "not_supported" => Error::NotSupported { operation: message },
        "checkpoint" => Error::Checkpoint { message },
        "session" => Error::Session { message },
        "auth" => Error::AuthFailure { message },
        "cancelled" => Error::Cancelled,
        _ => Error::Other(message),
    }
}

// ============================================================================
// Host -> crawler requests
// ============================================================================

/// `POST /init`: the host's reverse-channel coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    /// Address of the host's crawler-facing server
    pub host_addr: String,
    /// Shared magic, echoed back on every crawler-to-host request
    pub magic: String,
}

/// `POST /export` and `POST /validate_config` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRequest {
    /// Crawler-specific configuration, opaque to the runtime
    pub config: JsonValue,
}

/// `POST /validate_config` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfigResponse {
    /// Human-readable problems; empty means valid
    pub errors: Vec<String>,
}

/// `POST /onboard_export` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardExportRequest {
    /// Object family to onboard
    pub object_type: ObjectType,
    /// Crawler-specific configuration
    pub config: JsonValue,
}

/// `POST /onboard_export` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardExportResponse {
    /// Records produced for the onboarded object family
    pub records: Vec<ExportRecord>,
}

/// `POST /mutate` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateRequest {
    /// Write action name
    pub action: String,
    /// Action payload
    pub payload: JsonValue,
    /// Crawler-specific configuration
    pub config: JsonValue,
}

/// `POST /mutate` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateResponse {
    /// Action result
    pub result: JsonValue,
}

/// `POST /webhook` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRequest {
    /// Delivery headers as forwarded by the host
    pub headers: StringMap,
    /// Delivery body
    pub body: JsonValue,
    /// Crawler-specific configuration
    pub config: JsonValue,
}

/// `POST /webhook` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Objects the delivery mutated
    pub mutated_objects: Vec<ExportRecord>,
}

// ============================================================================
// Crawler -> host requests
// ============================================================================

/// `POST /export_started` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStartedRequest {
    /// Record type the session will export
    pub record_type: String,
}

/// `POST /send_exported` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendExportedRequest {
    /// Session the batch belongs to
    pub session_id: String,
    /// Progress marker for this batch
    pub checkpoint: Checkpoint,
    /// The batch
    pub records: Vec<ExportRecord>,
}

/// `POST /export_done` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDoneRequest {
    /// Session to close
    pub session_id: String,
    /// Final checkpoint
    pub checkpoint: Checkpoint,
}

/// `POST /export_git_repo` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportGitRepoRequest {
    /// Repository URL to mirror
    pub url: String,
}

/// Empty payload for endpoints with nothing to return
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {}
