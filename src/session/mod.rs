//! Export session and checkpoint manager
//!
//! A [`Session`] is the client half of the host's export bookkeeping:
//! started against a record type, fed records through a client-side
//! buffer, and closed exactly once with the new checkpoint. The
//! [`SessionManager`] enforces that at most one session per record
//! type is outstanding in a crawl run.
//!
//! `done` consumes the session, so the compiler guarantees nothing is
//! pushed after close; a session dropped without `done` logs an error
//! as a leak detector.

use crate::error::{Error, Result};
use crate::types::{Checkpoint, ExportRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Default number of buffered records before a flush
pub const DEFAULT_FLUSH_AT: usize = 100;

// ============================================================================
// HostApi
// ============================================================================

/// The host's response to `export_started`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStart {
    /// Host-allocated session id
    pub session_id: String,
    /// Checkpoint persisted by a previous run, if any
    pub last_checkpoint: Option<Checkpoint>,
}

/// The crawler-facing surface of the host.
///
/// Implemented by the in-process collector for tests and embedding,
/// and by the RPC reverse channel for the plugin process.
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Open an export session for a record type
    async fn export_started(&self, record_type: &str) -> Result<SessionStart>;

    /// Deliver a batch of records with the session's progress marker
    async fn send_exported(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
        records: Vec<ExportRecord>,
    ) -> Result<()>;

    /// Close a session, persisting its final checkpoint
    async fn export_done(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<()>;

    /// Ask the host to mirror a git repository
    async fn export_git_repo(&self, url: &str) -> Result<()>;
}

// ============================================================================
// SessionManager
// ============================================================================

/// Starts sessions and enforces the one-per-record-type invariant
pub struct SessionManager {
    host: Arc<dyn HostApi>,
    open: Arc<Mutex<HashSet<String>>>,
    flush_at: usize,
}

impl SessionManager {
    /// Create a manager over the given host
    pub fn new(host: Arc<dyn HostApi>) -> Self {
        Self {
            host,
            open: Arc::new(Mutex::new(HashSet::new())),
            flush_at: DEFAULT_FLUSH_AT,
        }
    }

    /// Set the buffer size at which sessions flush
    #[must_use]
    pub fn with_flush_at(mut self, flush_at: usize) -> Self {
        self.flush_at = flush_at.max(1);
        self
    }

    /// Open a session for `record_type`.
    ///
    /// Fails with a session error if one is already outstanding for the
    /// same record type.
    pub async fn start(&self, record_type: &str) -> Result<Session> {
        {
            let mut open = self.open.lock().map_err(|_| Error::session("slot lock poisoned"))?;
            if !open.insert(record_type.to_string()) {
                return Err(Error::session(format!(
                    "a session for {record_type:?} is already outstanding"
                )));
            }
        }

        let started = match self.host.export_started(record_type).await {
            Ok(started) => started,
            Err(e) => {
                self.release(record_type);
                return Err(e);
            }
        };
        info!(
            record_type,
            session_id = %started.session_id,
            last_checkpoint = ?started.last_checkpoint,
            "session started"
        );

        Ok(Session {
            id: started.session_id,
            record_type: record_type.to_string(),
            checkpoint: started.last_checkpoint.clone().unwrap_or_default(),
            checkpoint_at_start: started.last_checkpoint,
            start_time: Utc::now(),
            buffer: Vec::new(),
            flush_at: self.flush_at,
            host: Arc::clone(&self.host),
            open: Arc::clone(&self.open),
            finished: false,
        })
    }

    /// Open a sub-session under a parent.
    ///
    /// Purely a naming convention (`"issues#comments"`-style record
    /// types) over an independent session; there is no transport
    /// hierarchy.
    pub async fn start_child(&self, parent: &Session, name: &str) -> Result<Session> {
        self.start(&format!("{}#{name}", parent.record_type)).await
    }

    fn release(&self, record_type: &str) {
        if let Ok(mut open) = self.open.lock() {
            open.remove(record_type);
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One open export session.
///
/// Owned exclusively by the call stack that created it and destroyed
/// by [`Session::done`].
pub struct Session {
    id: String,
    record_type: String,
    checkpoint_at_start: Option<Checkpoint>,
    checkpoint: Checkpoint,
    start_time: DateTime<Utc>,
    buffer: Vec<ExportRecord>,
    flush_at: usize,
    host: Arc<dyn HostApi>,
    open: Arc<Mutex<HashSet<String>>>,
    finished: bool,
}

impl Session {
    /// Host-allocated session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record type this session exports
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Checkpoint observed when the session opened
    pub fn checkpoint_at_start(&self) -> Option<&Checkpoint> {
        self.checkpoint_at_start.as_ref()
    }

    /// When the session opened
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Update the progress marker attached to subsequent batches
    pub fn set_checkpoint(&mut self, checkpoint: impl Into<Checkpoint>) {
        self.checkpoint = checkpoint.into();
    }

    /// Buffer a record, flushing when the buffer is full
    pub async fn push(&mut self, record: ExportRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.flush_at {
            self.flush().await?;
        }
        Ok(())
    }

    /// Send the buffered records to the host
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffer);
        debug!(
            session_id = %self.id,
            records = batch.len(),
            "flushing batch"
        );
        self.host
            .send_exported(&self.id, &self.checkpoint, batch)
            .await
    }

    /// Close the session with its final checkpoint.
    ///
    /// Flushes the buffer, rejects a checkpoint older than the one
    /// observed at start, and releases the record-type slot. The slot
    /// is released on every outcome; the session object is gone either
    /// way and the host decides what a failed close means.
    pub async fn done(mut self, new_checkpoint: impl Into<Checkpoint>) -> Result<()> {
        self.finished = true;
        let record_type = self.record_type.clone();
        let outcome = self.close(new_checkpoint.into()).await;
        if let Ok(mut open) = self.open.lock() {
            open.remove(&record_type);
        }
        outcome
    }

    async fn close(&mut self, new_checkpoint: Checkpoint) -> Result<()> {
        if let Some(start) = &self.checkpoint_at_start {
            if new_checkpoint < *start {
                return Err(Error::checkpoint(format!(
                    "session {} for {:?}: done checkpoint {new_checkpoint:?} is older than start checkpoint {start:?}",
                    self.id, self.record_type
                )));
            }
        }

        self.checkpoint = new_checkpoint.clone();
        self.flush().await?;
        self.host.export_done(&self.id, &new_checkpoint).await?;
        info!(
            session_id = %self.id,
            record_type = %self.record_type,
            checkpoint = %new_checkpoint,
            "session done"
        );
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.finished {
            error!(
                session_id = %self.id,
                record_type = %self.record_type,
                buffered = self.buffer.len(),
                "session dropped without done; its records were not committed"
            );
            if let Ok(mut open) = self.open.lock() {
                open.remove(&self.record_type);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("record_type", &self.record_type)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}
