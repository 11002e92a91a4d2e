use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Payload written by a state capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Bytes(Vec<u8>),
    Text(String),
}

impl Artifact {
    pub fn len(&self) -> usize {
        match self {
            Artifact::Bytes(bytes) => bytes.len(),
            Artifact::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Artifact::Text(text) => Some(text),
            Artifact::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Artifact::Bytes(bytes) => bytes,
            Artifact::Text(text) => text.as_bytes(),
        }
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write_artifact(&self, path: &Path, artifact: &Artifact) -> Result<()>;

    /// `as_text` selects how the stored payload is decoded.
    async fn read_artifact(&self, path: &Path, as_text: bool) -> Result<Artifact>;
}

/// Stores artifacts under a root directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(EngineError::Storage(format!(
                "artifact path must stay inside the store: {}",
                path.display()
            )));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write_artifact(&self, path: &Path, artifact: &Artifact) -> Result<()> {
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, artifact.as_bytes()).await?;
        Ok(())
    }

    async fn read_artifact(&self, path: &Path, as_text: bool) -> Result<Artifact> {
        let full_path = self.resolve(path)?;
        if as_text {
            Ok(Artifact::Text(tokio::fs::read_to_string(&full_path).await?))
        } else {
            Ok(Artifact::Bytes(tokio::fs::read(&full_path).await?))
        }
    }
}

/// In-memory store, mostly useful for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    artifacts: Arc<RwLock<HashMap<PathBuf, Artifact>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn write_artifact(&self, path: &Path, artifact: &Artifact) -> Result<()> {
        let mut artifacts = self
            .artifacts
            .write()
            .map_err(|e| EngineError::Storage(format!("Failed to write artifacts: {}", e)))?;
        artifacts.insert(path.to_path_buf(), artifact.clone());
        Ok(())
    }

    async fn read_artifact(&self, path: &Path, as_text: bool) -> Result<Artifact> {
        let artifacts = self
            .artifacts
            .read()
            .map_err(|e| EngineError::Storage(format!("Failed to read artifacts: {}", e)))?;
        let stored = artifacts
            .get(path)
            .ok_or_else(|| EngineError::Storage(format!("Artifact not found: {}", path.display())))?;

        match (stored, as_text) {
            (Artifact::Bytes(bytes), true) => String::from_utf8(bytes.clone())
                .map(Artifact::Text)
                .map_err(|e| EngineError::Storage(format!("Artifact is not UTF-8: {}", e))),
            (Artifact::Text(text), false) => Ok(Artifact::Bytes(text.clone().into_bytes())),
            (artifact, _) => Ok(artifact.clone()),
        }
    }
}
