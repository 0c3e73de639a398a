//! Checkpoint persistence
//!
//! File persistence uses a temp-file write followed by a rename so a
//! crash mid-write never leaves a torn checkpoint file.

use crate::error::{Error, Result};
use crate::types::Checkpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Persistent checkpoint storage keyed by `(tenant, record_type)`
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The stored checkpoint, if any
    async fn get(&self, tenant: &str, record_type: &str) -> Result<Option<Checkpoint>>;

    /// Store a checkpoint
    async fn put(&self, tenant: &str, record_type: &str, checkpoint: &Checkpoint) -> Result<()>;
}

fn store_key(tenant: &str, record_type: &str) -> String {
    format!("{tenant}/{record_type}")
}

// ============================================================================
// MemoryCheckpointStore
// ============================================================================

/// In-memory checkpoint store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, tenant: &str, record_type: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(&store_key(tenant, record_type))
            .cloned())
    }

    async fn put(&self, tenant: &str, record_type: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(store_key(tenant, record_type), checkpoint.clone());
        Ok(())
    }
}

// ============================================================================
// FileCheckpointStore
// ============================================================================

/// File-backed checkpoint store: one JSON object per file, atomic writes
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl FileCheckpointStore {
    /// Open a store at `path`, loading existing checkpoints if present
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let checkpoints = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)
                .map_err(|e| Error::config(format!("unreadable checkpoint file {path:?}: {e}")))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            checkpoints: RwLock::new(checkpoints),
        })
    }

    async fn save(&self, checkpoints: &HashMap<String, Checkpoint>) -> Result<()> {
        let contents = serde_json::to_string_pretty(checkpoints)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, tenant: &str, record_type: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(&store_key(tenant, record_type))
            .cloned())
    }

    async fn put(&self, tenant: &str, record_type: &str, checkpoint: &Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(store_key(tenant, record_type), checkpoint.clone());
        self.save(&checkpoints).await
    }
}
