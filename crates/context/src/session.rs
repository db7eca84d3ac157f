//! One session's context items and running token total.

use crate::reader::ArtifactReader;
use crmpilot_core::error::ContextError;
use crmpilot_core::token::estimate_tokens;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// An artifact made visible to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    pub path: String,
    pub content: String,
    pub token_size: usize,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Ordered by path so listings are deterministic
    items: BTreeMap<String, ContextItem>,
    total_tokens: usize,
}

impl SessionState {
    fn insert(&mut self, item: ContextItem) {
        self.total_tokens += item.token_size;
        if let Some(previous) = self.items.insert(item.path.clone(), item) {
            self.total_tokens -= previous.token_size;
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.items.remove(key) {
            Some(item) => {
                self.total_tokens -= item.token_size;
                true
            }
            None => false,
        }
    }
}

/// Context state of a single session.
///
/// Mutations take the write lock only around the map update; content is
/// read from the [`ArtifactReader`] before the lock is acquired, so no lock
/// is ever held across I/O.
pub struct SessionContext {
    state: RwLock<SessionState>,
    reader: Arc<dyn ArtifactReader>,
    last_access: Mutex<Instant>,
}

impl SessionContext {
    pub fn new(reader: Arc<dyn ArtifactReader>) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            reader,
            last_access: Mutex::new(Instant::now()),
        }
    }

    /// Rebuild a session from persisted items, recomputing the total.
    pub fn restore(reader: Arc<dyn ArtifactReader>, items: Vec<ContextItem>) -> Self {
        let session = Self::new(reader);
        {
            let mut state = session.write();
            for item in items {
                state.insert(item);
            }
        }
        session
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read `path` through the reader and store it, replacing any previous
    /// item under the same key.
    pub async fn add_file(&self, path: &str) -> Result<ContextItem, ContextError> {
        let artifact = self.reader.read(path).await?;
        let item = ContextItem {
            path: artifact.key,
            token_size: estimate_tokens(&artifact.content),
            content: artifact.content,
        };

        let total = {
            let mut state = self.write();
            state.insert(item.clone());
            state.total_tokens
        };
        debug!(path = %item.path, tokens = item.token_size, session_tokens = total, "Context item added");
        Ok(item)
    }

    /// Remove `path` if present. Tries the canonical key and the literal one.
    ///
    /// Returns whether anything was removed; absence is not an error.
    pub fn remove_file(&self, path: &str) -> bool {
        let canonical = self.reader.canonical_key(path);
        let mut state = self.write();
        let removed_canonical = state.remove(&canonical);
        let removed_literal = canonical != path && state.remove(path);
        removed_canonical || removed_literal
    }

    /// Snapshot of all items, sorted by path.
    pub fn list_items(&self) -> Vec<ContextItem> {
        self.read().items.values().cloned().collect()
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.items.clear();
        state.total_tokens = 0;
    }

    pub fn total_tokens(&self) -> usize {
        self.read().total_tokens
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }

    pub(crate) fn touch(&self) {
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn last_access(&self) -> Instant {
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_access().elapsed()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("SessionContext")
            .field("items", &state.items.len())
            .field("total_tokens", &state.total_tokens)
            .finish()
    }
}
