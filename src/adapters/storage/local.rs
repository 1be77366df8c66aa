//! Filesystem blob store.
//!
//! Containers are directories under a root path and blobs are files inside
//! them. Appends go through `O_APPEND` writes. Overwrites write a temporary
//! sibling and rename it over the target, so readers never see a half-written
//! watermark.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{BlobError, BlobStore};

/// Blob store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, BlobError> {
        let relative = validate_name(container)?;
        if relative.components().count() != 1 {
            return Err(BlobError::InvalidName(container.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn blob_path(&self, container: &str, blob: &str) -> Result<PathBuf, BlobError> {
        Ok(self.container_path(container)?.join(validate_name(blob)?))
    }

    async fn require_container(&self, container: &str) -> Result<PathBuf, BlobError> {
        let dir = self.container_path(container)?;
        if fs::try_exists(&dir).await? {
            Ok(dir)
        } else {
            Err(BlobError::ContainerNotFound(container.to_string()))
        }
    }

    /// Write `text` to a temporary sibling, then rename it over `path`
    async fn replace_file(path: &Path, text: &str) -> Result<(), BlobError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(text.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        Ok(())
    }
}

/// Reject names that would escape the container directory
fn validate_name(name: &str) -> Result<&Path, BlobError> {
    let path = Path::new(name);
    let valid = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

    if valid {
        Ok(path)
    } else {
        Err(BlobError::InvalidName(name.to_string()))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool, BlobError> {
        let dir = self.container_path(container)?;
        if fs::try_exists(&dir).await? {
            return Ok(false);
        }
        fs::create_dir_all(&dir).await?;
        Ok(true)
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool, BlobError> {
        let path = self.blob_path(container, blob)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn blob_size(&self, container: &str, blob: &str) -> Result<Option<u64>, BlobError> {
        let path = self.blob_path(container, blob)?;

        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_append_blob(
        &self,
        container: &str,
        blob: &str,
        initial: &str,
    ) -> Result<(), BlobError> {
        self.require_container(container).await?;
        Self::replace_file(&self.blob_path(container, blob)?, initial).await
    }

    async fn append_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        let path = self.blob_path(container, blob)?;

        let mut file = match OpenOptions::new().append(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BlobError::not_found(container, blob));
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(text.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn write_text(&self, container: &str, blob: &str, text: &str) -> Result<(), BlobError> {
        self.require_container(container).await?;
        Self::replace_file(&self.blob_path(container, blob)?, text).await
    }

    async fn read_text(&self, container: &str, blob: &str) -> Result<String, BlobError> {
        let path = self.blob_path(container, blob)?;

        match fs::read(&path).await {
            Ok(bytes) => Ok(String::from_utf8(bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::not_found(container, blob)),
            Err(e) => Err(e.into()),
        }
    }
}
