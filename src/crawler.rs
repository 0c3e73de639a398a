//! The crawler seam
//!
//! Service-specific crawlers implement [`Crawler`] and differ only in
//! query construction and field mapping; the runtime owns transport,
//! pacing, sessions, and checkpoints. Only `export` and
//! `validate_config` are mandatory; the remaining operations default
//! to a not-supported error the host can surface verbatim.

use crate::engine::ExportContext;
use crate::error::{Error, Result};
use crate::types::{ExportRecord, JsonValue, StringMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Object families a crawler can onboard ahead of a full export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// Account and member objects
    Users,
    /// Source repositories
    Repos,
    /// Project containers
    Projects,
    /// Issue-tracker items
    Issues,
    /// Review requests
    PullRequests,
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Users => "users",
            Self::Repos => "repos",
            Self::Projects => "projects",
            Self::Issues => "issues",
            Self::PullRequests => "pull_requests",
        };
        f.write_str(name)
    }
}

/// A service-specific crawler.
///
/// `config` is the crawler's own JSON configuration, opaque to the
/// runtime; it travels over the RPC boundary as-is.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Run a full or incremental export
    async fn export(&self, ctx: &ExportContext, config: &JsonValue) -> Result<()>;

    /// Check a configuration, returning human-readable problems
    /// (empty means valid)
    async fn validate_config(&self, config: &JsonValue) -> Result<Vec<String>>;

    /// Export one object family ahead of a full crawl, returning the
    /// onboarded records
    async fn onboard_export(
        &self,
        _ctx: &ExportContext,
        _object_type: ObjectType,
        _config: &JsonValue,
    ) -> Result<Vec<ExportRecord>> {
        Err(Error::not_supported("onboard_export"))
    }

    /// Perform a write action against the remote service
    async fn mutate(
        &self,
        _action: &str,
        _payload: &JsonValue,
        _config: &JsonValue,
    ) -> Result<JsonValue> {
        Err(Error::not_supported("mutate"))
    }

    /// Handle a webhook delivery forwarded by the host, returning the
    /// objects the delivery mutated
    async fn webhook(
        &self,
        _headers: &StringMap,
        _body: &JsonValue,
        _config: &JsonValue,
    ) -> Result<Vec<ExportRecord>> {
        Err(Error::not_supported("webhook"))
    }
}
