//! Artifact readers: where context content comes from.
//!
//! The session store never touches the filesystem itself; it asks an
//! injected [`ArtifactReader`] for content and for the canonical key under
//! which an artifact is stored.

use async_trait::async_trait;
use crmpilot_core::error::ContextError;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Content read for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Canonical key the item is stored under
    pub key: String,
    pub content: String,
}

#[async_trait]
pub trait ArtifactReader: Send + Sync {
    /// Canonical form of a caller-supplied path. Must not perform I/O.
    fn canonical_key(&self, path: &str) -> String;

    /// Read the artifact's full content.
    async fn read(&self, path: &str) -> Result<Artifact, ContextError>;
}

/// Reads context files from the local filesystem.
///
/// Paths are keyed by their absolute form. When allowed roots are set,
/// files resolving outside every root are refused as unreadable.
#[derive(Debug, Clone, Default)]
pub struct FsArtifactReader {
    allowed_roots: Vec<PathBuf>,
}

impl FsArtifactReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed_roots(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let allowed_roots = roots
            .into_iter()
            .map(|root| std::fs::canonicalize(&root).unwrap_or_else(|_| absolute(&root)))
            .collect();
        Self { allowed_roots }
    }

    async fn check_allowed(&self, path: &str, absolute_path: &Path) -> Result<(), ContextError> {
        if self.allowed_roots.is_empty() {
            return Ok(());
        }

        let resolved = tokio::fs::canonicalize(absolute_path)
            .await
            .map_err(|e| io_error(path, e))?;

        if self.allowed_roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(())
        } else {
            Err(ContextError::Unreadable {
                path: path.to_string(),
                reason: "outside the allowed context roots".into(),
            })
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn io_error(path: &str, err: std::io::Error) -> ContextError {
    match err.kind() {
        ErrorKind::NotFound => ContextError::NotFound(path.to_string()),
        _ => ContextError::Unreadable {
            path: path.to_string(),
            reason: err.to_string(),
        },
    }
}

#[async_trait]
impl ArtifactReader for FsArtifactReader {
    fn canonical_key(&self, path: &str) -> String {
        absolute(Path::new(path)).to_string_lossy().into_owned()
    }

    async fn read(&self, path: &str) -> Result<Artifact, ContextError> {
        let absolute_path = absolute(Path::new(path));
        self.check_allowed(path, &absolute_path).await?;

        let content = tokio::fs::read_to_string(&absolute_path)
            .await
            .map_err(|e| io_error(path, e))?;

        Ok(Artifact {
            key: absolute_path.to_string_lossy().into_owned(),
            content,
        })
    }
}

/// A reader over an in-memory map. Keys are used verbatim.
///
/// Useful for tests and for embedding callers that stage content themselves.
#[derive(Debug, Default)]
pub struct InMemoryReader {
    files: RwLock<HashMap<String, String>>,
}

impl InMemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage (or replace) the content served for `path`.
    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
        self.files
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(path.into(), content.into());
    }
}

#[async_trait]
impl ArtifactReader for InMemoryReader {
    fn canonical_key(&self, path: &str) -> String {
        path.to_string()
    }

    async fn read(&self, path: &str) -> Result<Artifact, ContextError> {
        let files = self
            .files
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        files
            .get(path)
            .map(|content| Artifact {
                key: path.to_string(),
                content: content.clone(),
            })
            .ok_or_else(|| ContextError::NotFound(path.to_string()))
    }
}
