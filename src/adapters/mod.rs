//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the two collaborators of a sync
//! run: the order source (Shopify) and the blob store holding the watermark
//! and the CSV log (Azure Blob Storage, local filesystem, memory).

pub mod shopify;
pub mod storage;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::domain::{Order, Watermark};

// Re-export the concrete adapters
pub use shopify::{ShopifyClient, ShopifyConfig};
pub use storage::{
    AzureBlobStore, AzureConfig, BlobError, BlobStore, LocalBlobStore, MemoryBlobStore,
};

/// Errors from an order source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid orders response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Paginated source of orders filtered by creation time
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Fetch one page of orders created at or after `created_at_min`.
    ///
    /// Pages are 1-based; an empty page means there is nothing further.
    async fn fetch_page(
        &self,
        created_at_min: &Watermark,
        page: u32,
    ) -> Result<Vec<Order>, SourceError>;
}
