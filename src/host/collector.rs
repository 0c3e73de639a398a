//! Host-side session bookkeeping

use super::store::CheckpointStore;
use crate::error::{Error, Result};
use crate::session::{HostApi, SessionStart};
use crate::types::{Checkpoint, ExportRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The host side of the export contract.
///
/// A collector allocates session ids, answers `export_started` with
/// the prior checkpoint, accepts delivered records, and persists the
/// new checkpoint at `export_done`.
pub trait Collector: HostApi {
    /// The tenant whose checkpoints this collector reads and writes
    fn tenant(&self) -> &str;
}

#[derive(Debug, Clone)]
struct OpenSession {
    record_type: String,
    checkpoint_at_start: Option<Checkpoint>,
}

/// A collector that keeps delivered records in memory.
///
/// Used by the in-process test harness and by embedders that forward
/// records elsewhere; the checkpoint store behind it may still be
/// file-backed.
pub struct InMemoryCollector {
    tenant: String,
    store: Arc<dyn CheckpointStore>,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<String, OpenSession>>,
    records: Mutex<HashMap<String, Vec<ExportRecord>>>,
    git_repos: Mutex<Vec<String>>,
}

impl InMemoryCollector {
    /// Create a collector for `tenant` over the given store
    pub fn new(tenant: impl Into<String>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            tenant: tenant.into(),
            store,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            git_repos: Mutex::new(Vec::new()),
        }
    }

    /// Records delivered for a record type so far
    pub async fn records(&self, record_type: &str) -> Vec<ExportRecord> {
        self.records
            .lock()
            .await
            .get(record_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Total records delivered across all record types
    pub async fn record_count(&self) -> usize {
        self.records.lock().await.values().map(Vec::len).sum()
    }

    /// Git repository URLs the crawler asked the host to mirror
    pub async fn git_repos(&self) -> Vec<String> {
        self.git_repos.lock().await.clone()
    }

    /// Sessions opened but not yet closed
    pub async fn open_session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl HostApi for InMemoryCollector {
    async fn export_started(&self, record_type: &str) -> Result<SessionStart> {
        let last_checkpoint = self.store.get(&self.tenant, record_type).await?;
        let session_id = format!("sess-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().await.insert(
            session_id.clone(),
            OpenSession {
                record_type: record_type.to_string(),
                checkpoint_at_start: last_checkpoint.clone(),
            },
        );
        info!(
            tenant = %self.tenant,
            record_type,
            session_id = %session_id,
            "export started"
        );
        Ok(SessionStart {
            session_id,
            last_checkpoint,
        })
    }

    async fn send_exported(
        &self,
        session_id: &str,
        _checkpoint: &Checkpoint,
        records: Vec<ExportRecord>,
    ) -> Result<()> {
        let record_type = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(session_id)
                .ok_or_else(|| Error::session(format!("unknown session {session_id:?}")))?
                .record_type
                .clone()
        };
        self.records
            .lock()
            .await
            .entry(record_type)
            .or_default()
            .extend(records);
        Ok(())
    }

    async fn export_done(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| Error::session(format!("unknown session {session_id:?}")))?;

        if let Some(start) = &session.checkpoint_at_start {
            if checkpoint < start {
                warn!(
                    session_id,
                    checkpoint = %checkpoint,
                    start = %start,
                    "rejecting out-of-order checkpoint"
                );
                return Err(Error::checkpoint(format!(
                    "session {session_id:?}: checkpoint {checkpoint:?} is older than {start:?}"
                )));
            }
        }

        let session = sessions
            .remove(session_id)
            .ok_or_else(|| Error::session(format!("unknown session {session_id:?}")))?;
        drop(sessions);

        self.store
            .put(&self.tenant, &session.record_type, checkpoint)
            .await?;
        info!(
            session_id,
            record_type = %session.record_type,
            checkpoint = %checkpoint,
            "export done"
        );
        Ok(())
    }

    async fn export_git_repo(&self, url: &str) -> Result<()> {
        self.git_repos.lock().await.push(url.to_string());
        Ok(())
    }
}

impl Collector for InMemoryCollector {
    fn tenant(&self) -> &str {
        &self.tenant
    }
}
