//! Blob storage for the watermark and the CSV order log.
//!
//! The sync only needs a handful of operations: make sure a container
//! exists, check for a blob (and its size), create an append blob with
//! initial text, append text, overwrite a blob with text and read a blob
//! back as text.
//!
//! Backends:
//! - [`AzureBlobStore`]: Azure Blob Storage REST API with SharedKey auth
//! - [`LocalBlobStore`]: directories and files under a root path
//! - [`MemoryBlobStore`]: in-process map, for tests and dry runs

pub mod azure;
pub mod local;
pub mod memory;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

pub use azure::{AzureBlobStore, AzureConfig};
pub use local::LocalBlobStore;
pub use memory::{MemoryBlobStore, StoreOp};

/// Errors that can occur in a blob store
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Blob not found: {container}/{blob}")]
    NotFound { container: String, blob: String },

    #[error("Invalid blob name: {0}")]
    InvalidName(String),

    #[error("Invalid storage configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Blob is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

impl BlobError {
    pub(crate) fn not_found(container: &str, blob: &str) -> Self {
        Self::NotFound {
            container: container.to_string(),
            blob: blob.to_string(),
        }
    }
}

/// Text blob operations used by the sync
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Create the container unless it exists. Returns `true` if it was created.
    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool, BlobError>;

    /// Check whether a blob exists
    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool, BlobError>;

    /// Size of a blob in bytes, `None` if it does not exist
    async fn blob_size(&self, container: &str, blob: &str) -> Result<Option<u64>, BlobError>;

    /// Create (or replace) an append blob holding `initial`
    async fn create_append_blob(
        &self,
        container: &str,
        blob: &str,
        initial: &str,
    ) -> Result<(), BlobError>;

    /// Append text to an existing append blob
    async fn append_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError>;

    /// Create or overwrite a blob with the given text in a single write
    async fn write_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError>;

    /// Read a whole blob as UTF-8 text
    async fn read_text(&self, container: &str, blob: &str) -> Result<String, BlobError>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool, BlobError> {
        (**self).create_container_if_not_exists(container).await
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool, BlobError> {
        (**self).blob_exists(container, blob).await
    }

    async fn blob_size(&self, container: &str, blob: &str) -> Result<Option<u64>, BlobError> {
        (**self).blob_size(container, blob).await
    }

    async fn create_append_blob(
        &self,
        container: &str,
        blob: &str,
        initial: &str,
    ) -> Result<(), BlobError> {
        (**self).create_append_blob(container, blob, initial).await
    }

    async fn append_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        (**self).append_text(container, blob, text).await
    }

    async fn write_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        (**self).write_text(container, blob, text).await
    }

    async fn read_text(&self, container: &str, blob: &str) -> Result<String, BlobError> {
        (**self).read_text(container, blob).await
    }
}
