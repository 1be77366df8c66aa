//! Domain types for the order sync.
//!
//! This module contains the core data structures:
//! - Order: Records fetched from the order source
//! - Watermark: Lower creation-time bound persisted between runs
//! - Run: Per-run context, page cursor and outcome

pub mod order;
pub mod run;
pub mod watermark;

// Re-export commonly used types
pub use order::{BillingAddress, Customer, Order, OrderPage, ORDER_FIELDS};
pub use run::{PageCursor, RunContext, RunOutcome, RunReport, SyncStage, SyncTarget};
pub use watermark::{Watermark, WatermarkParseError};
