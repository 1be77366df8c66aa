//! In-memory blob store.
//!
//! Clones share the same state, so a test can hand one clone to the
//! orchestrator and inspect blobs and the operation journal through another.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{BlobError, BlobStore};

/// A mutating operation applied to the store, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    CreateContainer { container: String },
    CreateAppendBlob { container: String, blob: String },
    Append { container: String, blob: String, bytes: usize },
    Write { container: String, blob: String },
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: BTreeSet<String>,
    blobs: BTreeMap<(String, String), String>,
    journal: Vec<StoreOp>,
}

/// Map-backed blob store
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current content of a blob, if present
    pub fn get(&self, container: &str, blob: &str) -> Option<String> {
        self.lock()
            .blobs
            .get(&(container.to_string(), blob.to_string()))
            .cloned()
    }

    /// Seed a blob directly, creating its container
    pub fn insert(&self, container: &str, blob: &str, text: &str) {
        let mut state = self.lock();
        state.containers.insert(container.to_string());
        state
            .blobs
            .insert((container.to_string(), blob.to_string()), text.to_string());
    }

    /// All mutating operations so far
    pub fn operations(&self) -> Vec<StoreOp> {
        self.lock().journal.clone()
    }

    fn require_container(state: &MemoryState, container: &str) -> Result<(), BlobError> {
        if state.containers.contains(container) {
            Ok(())
        } else {
            Err(BlobError::ContainerNotFound(container.to_string()))
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool, BlobError> {
        let mut state = self.lock();
        let created = state.containers.insert(container.to_string());
        if created {
            state.journal.push(StoreOp::CreateContainer {
                container: container.to_string(),
            });
        }
        Ok(created)
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool, BlobError> {
        Ok(self
            .lock()
            .blobs
            .contains_key(&(container.to_string(), blob.to_string())))
    }

    async fn blob_size(&self, container: &str, blob: &str) -> Result<Option<u64>, BlobError> {
        Ok(self.get(container, blob).map(|text| text.len() as u64))
    }

    async fn create_append_blob(
        &self,
        container: &str,
        blob: &str,
        initial: &str,
    ) -> Result<(), BlobError> {
        let mut state = self.lock();
        Self::require_container(&state, container)?;
        state
            .blobs
            .insert((container.to_string(), blob.to_string()), initial.to_string());
        state.journal.push(StoreOp::CreateAppendBlob {
            container: container.to_string(),
            blob: blob.to_string(),
        });
        Ok(())
    }

    async fn append_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        let mut state = self.lock();
        let content = state
            .blobs
            .get_mut(&(container.to_string(), blob.to_string()))
            .ok_or_else(|| BlobError::not_found(container, blob))?;
        content.push_str(text);
        state.journal.push(StoreOp::Append {
            container: container.to_string(),
            blob: blob.to_string(),
            bytes: text.len(),
        });
        Ok(())
    }

    async fn write_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        let mut state = self.lock();
        Self::require_container(&state, container)?;
        state
            .blobs
            .insert((container.to_string(), blob.to_string()), text.to_string());
        state.journal.push(StoreOp::Write {
            container: container.to_string(),
            blob: blob.to_string(),
        });
        Ok(())
    }

    async fn read_text(&self, container: &str, blob: &str) -> Result<String, BlobError> {
        self.get(container, blob)
            .ok_or_else(|| BlobError::not_found(container, blob))
    }
}
