//! Core sync logic.
//!
//! This module contains:
//! - RowEncoder: CSV schema and row encoding
//! - SyncOrchestrator: the per-run state machine
//! - RunLock: cross-process exclusion of runs
//! - Scheduler: periodic trigger

pub mod encoder;
pub mod lock;
pub mod orchestrator;
pub mod scheduler;

// Re-export commonly used types
pub use encoder::{Column, Field, RowEncoder};
pub use lock::RunLock;
pub use orchestrator::{SyncError, SyncOrchestrator, SyncState};
pub use scheduler::{Scheduler, DEFAULT_INTERVAL_SECS};
