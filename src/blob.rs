//! Blob storage trait and local filesystem implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Error type for blob operations.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("io error for {key}: {message}")]
    Io { key: String, message: String },
}

/// Object storage scoped by string keys.
///
/// Keys use `/` separators; a job's objects all live under the `"{job_id}/"`
/// prefix so cleanup can remove them in one call.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write an object, replacing any existing one.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError>;

    /// Read an object's bytes.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Delete every object under a prefix; returns the number removed.
    /// Deleting an absent prefix is not an error.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BlobError>;
}

/// Filesystem-backed blob store rooted at a directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|p| !p.is_empty() && *p != "..") {
            path.push(part);
        }
        path
    }
}

async fn count_files(dir: &Path) -> Result<usize, std::io::Error> {
    let mut count = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let ty = entry.file_type().await?;
            if ty.is_dir() {
                stack.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| BlobError::Io {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| BlobError::Io {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.resolve(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Io {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BlobError> {
        let path = self.resolve(prefix);
        if !path.exists() {
            return Ok(0);
        }
        let removed = count_files(&path).await.map_err(|e| BlobError::Io {
            key: prefix.to_string(),
            message: e.to_string(),
        })?;
        tokio::fs::remove_dir_all(&path).await.map_err(|e| BlobError::Io {
            key: prefix.to_string(),
            message: e.to_string(),
        })?;
        Ok(removed)
    }
}
