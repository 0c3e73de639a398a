//! Bounded concurrency work distributor
//!
//! Exactly `concurrency` workers loop "pop next item, process, repeat"
//! over a shared queue until it is empty. There is no cross-item
//! ordering and each item is delivered to at most one worker.
//!
//! A failing item is isolated by default: its error lands in the
//! [`DispatchReport`] and the remaining items proceed. `fail_fast`
//! restores abort-on-first-error for callers that need it.
//! Cancellation drains the queue without processing further items.

use crate::error::{Error, Result};
use crate::types::WorkItem;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a dispatch run
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Abort on the first item failure instead of isolating it
    pub fail_fast: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fail_fast: false,
        }
    }
}

impl DispatchConfig {
    /// Create a config with the given worker count
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }

    /// Set fail fast mode
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of a dispatch run, one entry per input item.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Items processed successfully
    pub completed: Vec<WorkItem>,
    /// Items whose processing returned an error
    pub failed: Vec<(WorkItem, Error)>,
    /// Items drained unprocessed (cancellation or fail-fast abort)
    pub skipped: Vec<WorkItem>,
}

impl DispatchReport {
    /// Whether every item completed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Turn the report into a result, surfacing the first failure
    pub fn into_result(mut self) -> Result<()> {
        if !self.failed.is_empty() {
            let (item, error) = self.failed.remove(0);
            return Err(Error::Other(format!("item {item} failed: {error}")));
        }
        if !self.skipped.is_empty() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Process `items` with a bounded worker pool.
///
/// `process` is invoked once per item; items are popped from a shared
/// queue so faster workers naturally take more of them.
pub async fn run<F, Fut>(
    items: Vec<WorkItem>,
    config: &DispatchConfig,
    process: F,
    cancel: &CancellationToken,
) -> DispatchReport
where
    F: Fn(WorkItem) -> Fut + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    let total = items.len();
    let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<_>>()));
    let report = Arc::new(Mutex::new(DispatchReport::default()));
    let abort = Arc::new(AtomicBool::new(false));
    let workers = config.concurrency.max(1);

    info!(items = total, workers, "dispatch started");

    let worker_futures = (0..workers).map(|worker| {
        let queue = Arc::clone(&queue);
        let report = Arc::clone(&report);
        let abort = Arc::clone(&abort);
        let process = &process;
        async move {
            loop {
                if cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
                    let drained: Vec<WorkItem> = queue.lock().await.drain(..).collect();
                    if !drained.is_empty() {
                        debug!(worker, drained = drained.len(), "draining queue");
                        report.lock().await.skipped.extend(drained);
                    }
                    return;
                }

                let item = queue.lock().await.pop_front();
                let Some(item) = item else { return };

                match process(item.clone()).await {
                    Ok(()) => {
                        report.lock().await.completed.push(item);
                    }
                    Err(e) => {
                        warn!(item = %item, error = %e, "item failed");
                        if config.fail_fast {
                            abort.store(true, Ordering::SeqCst);
                        }
                        report.lock().await.failed.push((item, e));
                    }
                }
            }
        }
    });
    futures::future::join_all(worker_futures).await;

    let report = Arc::try_unwrap(report)
        .map(Mutex::into_inner)
        .unwrap_or_default();
    info!(
        completed = report.completed.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "dispatch finished"
    );
    report
}
