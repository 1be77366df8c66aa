//! ordersync - Incremental Shopify order export
//!
//! Periodically pulls orders created since the last successful run from the
//! Shopify Admin API and appends them as CSV rows to an append-only blob,
//! tracking progress with a watermark blob next to it.
//!
//! # Architecture
//!
//! Each run is an explicit state machine:
//! - Storage is initialized (container, watermark, log header) on first use
//! - Orders are fetched page by page and appended as they arrive
//! - The watermark only advances after the final, empty page
//!
//! A failed run leaves the watermark untouched, so the next run fetches the
//! same window again (at-least-once delivery into the log).
//!
//! # Modules
//!
//! - `adapters`: External system integrations (Shopify, blob stores)
//! - `core`: Sync logic (RowEncoder, SyncOrchestrator, Scheduler)
//! - `domain`: Data structures (Order, Watermark, RunReport)
//! - `config`: Config file and environment resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Sync once
//! ordersync run
//!
//! # Sync every five minutes until Ctrl+C
//! ordersync schedule --interval 300
//!
//! # Inspect the stored watermark
//! ordersync status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::adapters::{BlobStore, OrderSource, ShopifyClient, ShopifyConfig};
pub use crate::core::{RowEncoder, Scheduler, SyncError, SyncOrchestrator};
pub use crate::domain::{Order, RunOutcome, RunReport, SyncTarget, Watermark};
