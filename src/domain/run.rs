//! Per-run values threaded through the sync state machine.
//!
//! A run is one trigger of the orchestrator. Its context is fixed when the
//! run starts; progress through the paged fetch is carried by [`PageCursor`]
//! values inside the states rather than by mutable fields.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a sync target keeps its state in the blob store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    /// Container holding both objects
    pub container: String,

    /// Object holding the ISO-8601 watermark text
    pub watermark_blob: String,

    /// Append-only CSV log object
    pub orders_blob: String,
}

/// Immutable context of a single run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique identifier for this run (log correlation only)
    pub run_id: Uuid,

    /// Captured when the run was triggered; becomes the next watermark
    pub started_at: DateTime<Utc>,

    /// Storage locations for this run
    pub target: SyncTarget,
}

impl RunContext {
    pub fn new(started_at: DateTime<Utc>, target: SyncTarget) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            target,
        }
    }
}

/// Position in the paged fetch of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// 1-based page number to fetch next
    pub page: u32,

    /// Orders seen so far in this run
    pub total: u64,
}

impl PageCursor {
    pub fn first() -> Self {
        Self { page: 1, total: 0 }
    }

    /// Cursor for the next page after `count` orders were written
    pub fn advance(self, count: usize) -> Self {
        Self {
            page: self.page + 1,
            total: self.total + count as u64,
        }
    }

    /// Number of pages that carried orders before this cursor
    pub fn pages_written(&self) -> u32 {
        self.page - 1
    }
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::first()
    }
}

/// Stage of the run where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Container or blob creation / existence checks
    StorageInit,
    WatermarkRead,
    Fetch,
    Append,
    WatermarkWrite,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StorageInit => "storage_init",
            Self::WatermarkRead => "watermark_read",
            Self::Fetch => "fetch",
            Self::Append => "append",
            Self::WatermarkWrite => "watermark_write",
        };
        f.write_str(name)
    }
}

/// Final outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    /// All pages appended and the watermark advanced
    Completed { orders: u64, pages: u32 },

    /// Run stopped; appended pages stay, the watermark is untouched
    Failed { stage: SyncStage, error: String },

    /// Another run held the lock
    Skipped,
}

/// Summary returned to whoever triggered the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, RunOutcome::Failed { .. })
    }
}
