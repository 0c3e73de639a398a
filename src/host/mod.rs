//! Host-side collector and checkpoint persistence
//!
//! The host owns checkpoints, keyed by `(tenant, record_type)`, and the
//! session bookkeeping behind the crawler-facing RPC surface. The
//! collector reads the prior checkpoint when a session opens, buffers
//! delivered records, and persists the new checkpoint when the session
//! closes; an out-of-order close is rejected.

mod collector;
mod store;

pub use collector::{Collector, InMemoryCollector};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
