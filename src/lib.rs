//! # Crawlkit
//!
//! A Rust-native runtime for building incremental, checkpointed data
//! crawlers that run as isolated plugin processes.
//!
//! Crawlkit underlies service-specific crawlers (issue trackers,
//! source-code hosts) that differ only in query construction and field
//! mapping. The runtime provides everything else:
//!
//! - **Resilient HTTP**: retries with backoff, rate-limit cooldowns,
//!   bearer-token refresh
//! - **Pagination**: cursor, checkpoint-bounded, offset, and link-header
//!   walks over caller-supplied fetchers
//! - **Work distribution**: a bounded worker pool over independent
//!   crawl targets
//! - **Export sessions**: checkpointed, batched record delivery to the
//!   host collector
//! - **Plugin transport**: bidirectional RPC between a host process and
//!   a crawler subprocess
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crawlkit::rpc::{self, PluginConfig};
//! use crawlkit::{Crawler, ExportContext, Result};
//! use std::sync::Arc;
//!
//! struct TrackerCrawler;
//!
//! #[async_trait::async_trait]
//! impl Crawler for TrackerCrawler {
//!     async fn export(&self, ctx: &ExportContext, config: &serde_json::Value) -> Result<()> {
//!         let mut session = ctx.sessions().start("issues").await?;
//!         // ... drive crawlkit::paginate over your fetcher ...
//!         session.done("2024-01-01T00:00:00Z").await
//!     }
//!
//!     async fn validate_config(&self, config: &serde_json::Value) -> Result<Vec<String>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     crawlkit::telemetry::init();
//!     rpc::run(Arc::new(TrackerCrawler), PluginConfig::default()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Host process                                                │
//! │   PluginHandle ──spawn/dial──▶ crawler subprocess           │
//! │   HostServer  ◀──reverse channel── HostHandle               │
//! │   Collector + CheckpointStore                               │
//! └─────────────────────────────────────────────────────────────┘
//! ┌──────────┬───────────┬───────────────┬──────────────────────┐
//! │   http   │  paginate │   dispatch    │       session        │
//! ├──────────┼───────────┼───────────────┼──────────────────────┤
//! │ Retry    │ Cursor    │ Worker pool   │ Start/Send/Done      │
//! │ Cooldown │ NewerThan │ Isolation     │ Batching             │
//! │ Refresh  │ Offset    │ fail_fast     │ Monotonic checkpoint │
//! │ Limiter  │ LinkHdr   │ Cancellation  │ Child sessions       │
//! └──────────┴───────────┴───────────────┴──────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the runtime
pub mod error;

/// Common types shared across modules
pub mod types;

/// HTTP client with retry, cooldown, and token refresh
pub mod http;

/// Pagination walk strategies
pub mod paginate;

/// Bounded-concurrency work distribution
pub mod dispatch;

/// Export sessions and checkpoint bookkeeping
pub mod session;

/// Host/plugin RPC transport
pub mod rpc;

/// Host-side collector and checkpoint stores
pub mod host;

/// The Crawler trait implemented by plugins
pub mod crawler;

/// Per-run export context wiring
pub mod engine;

/// Tracing subscriber setup
pub mod telemetry;

// ============================================================================
// Re-exports
// ============================================================================

pub use crawler::{Crawler, ObjectType};
pub use engine::ExportContext;
pub use error::{Error, Result};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
