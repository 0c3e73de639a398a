//! Common types used throughout crawlkit
//!
//! This module contains the shared data model: pagination metadata,
//! export records, checkpoints, and work items.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Generic key-value map with string keys and values
pub type StringMap = HashMap<String, String>;

/// Opaque progress marker for a `(tenant, record_type)` pair.
///
/// Usually a timestamp or a cursor; the runtime never interprets it
/// beyond ordering comparisons at session close.
pub type Checkpoint = String;

// ============================================================================
// PageInfo
// ============================================================================

/// Pagination metadata returned by a single page fetch.
///
/// Unifies cursor-based and offset-based pagination; fields not used by
/// a given backend are left at their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageInfo {
    /// More pages exist after this one (cursor pagination)
    pub has_next_page: bool,
    /// Cursor of the last item on this page
    pub end_cursor: String,
    /// Pages exist before this one
    pub has_previous_page: bool,
    /// Cursor of the first item on this page
    pub start_cursor: String,
    /// Total matching items, when the backend reports it
    pub total: u64,
    /// Backend-imposed page size ceiling
    pub max_results: u64,
    /// More pages exist after this one (offset pagination)
    pub has_more: bool,
    /// Number of items delivered on this page (offset pagination)
    pub page_size: u64,
}

impl PageInfo {
    /// A page that continues cursor pagination
    pub fn next_cursor(end_cursor: impl Into<String>) -> Self {
        Self {
            has_next_page: true,
            end_cursor: end_cursor.into(),
            ..Self::default()
        }
    }

    /// A final page: nothing follows
    pub fn last() -> Self {
        Self::default()
    }

    /// A page that continues offset pagination
    pub fn more(page_size: u64) -> Self {
        Self {
            has_more: true,
            page_size,
            ..Self::default()
        }
    }
}

// ============================================================================
// ExportRecord
// ============================================================================

/// The externally visible unit sent to the host collector.
///
/// Records are batched before transmission; batch size is a tunable,
/// not a correctness concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Structured record payload
    pub data: JsonObject,
}

impl ExportRecord {
    /// Create a record from a JSON object
    pub fn new(data: JsonObject) -> Self {
        Self { data }
    }

    /// Create a record from any JSON value, wrapping non-objects
    /// under a `"value"` key
    pub fn from_value(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(data) => Self { data },
            other => {
                let mut data = JsonObject::new();
                data.insert("value".to_string(), other);
                Self { data }
            }
        }
    }
}

// ============================================================================
// WorkItem
// ============================================================================

/// One independently crawlable target (e.g. a repository or project).
///
/// Consumed at-most-once by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque target id
    pub id: String,
}

impl WorkItem {
    /// Create a work item
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

// ============================================================================
// RetryDecision
// ============================================================================

/// The request client's classification of a single failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt may change the outcome
    pub retryable: bool,
    /// How long to wait before the next attempt
    pub cooldown: Duration,
    /// Total elapsed time after which the client gives up regardless
    pub give_up_after: Duration,
}

impl RetryDecision {
    /// A terminal failure: no further attempts
    pub fn fatal() -> Self {
        Self {
            retryable: false,
            cooldown: Duration::ZERO,
            give_up_after: Duration::ZERO,
        }
    }

    /// A retryable failure with the given cooldown
    pub fn retry_after(cooldown: Duration, give_up_after: Duration) -> Self {
        Self {
            retryable: true,
            cooldown,
            give_up_after,
        }
    }
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}
