//! Named artifact storage for status reports and result manifests.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::RwLock,
};

use async_trait::async_trait;
use thiserror::Error;

/// Artifact store error.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Internal(String),
}

/// Trait for artifact storage backends.
///
/// Artifacts are overwritten in place; readers always see the latest
/// complete snapshot.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write (or overwrite) a named artifact.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), ArtifactError>;

    /// Read a named artifact.
    async fn read(&self, name: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// In-memory artifact store.
///
/// Backs the loopback transport and tests. Data is lost on drop.
pub struct MemoryArtifacts {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifacts {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryArtifacts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        self.inner
            .write()
            .map_err(|e| ArtifactError::Internal(e.to_string()))?
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, ArtifactError> {
        self.inner
            .read()
            .map_err(|e| ArtifactError::Internal(e.to_string()))?
            .get(name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(name.to_string()))
    }
}

/// Directory-backed artifact store used by the runner binary.
///
/// Writes go through a temp file and rename so a concurrent reader never
/// observes a half-written snapshot.
pub struct DirArtifacts {
    root: PathBuf,
}

impl DirArtifacts {
    /// Create a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for DirArtifacts {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(name);
        let tmp = self.root.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.root.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
