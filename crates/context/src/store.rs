//! Credential-keyed registry of session contexts.

use crate::reader::ArtifactReader;
use crate::session::{ContextItem, SessionContext};
use crmpilot_core::error::ContextError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Short, non-reversible label for a credential, safe to log.
pub fn session_fingerprint(credential: &str) -> String {
    let mut hasher = DefaultHasher::new();
    credential.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Bounds on how many sessions are kept and for how long.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub max_sessions: usize,
    pub idle_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            idle_ttl: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    sessions: BTreeMap<String, Vec<ContextItem>>,
}

/// Lazily creates one [`SessionContext`] per credential.
///
/// Sessions for different credentials never share state. Idle sessions are
/// dropped by [`ContextStore::evict_idle`], and the least recently used one
/// is evicted when the store grows past `max_sessions`.
pub struct ContextStore {
    sessions: DashMap<String, Arc<SessionContext>>,
    reader: Arc<dyn ArtifactReader>,
    policy: SessionPolicy,
    snapshot_path: Option<PathBuf>,
    /// Serializes snapshot writers.
    write_lock: tokio::sync::Mutex<()>,
}

impl ContextStore {
    pub fn new(reader: Arc<dyn ArtifactReader>) -> Self {
        Self {
            sessions: DashMap::new(),
            reader,
            policy: SessionPolicy::default(),
            snapshot_path: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Session for `credential`, created on first use.
    pub fn session(&self, credential: &str) -> Arc<SessionContext> {
        let (session, created) = match self.sessions.get(credential) {
            Some(existing) => (existing.value().clone(), false),
            None => {
                let entry = self
                    .sessions
                    .entry(credential.to_string())
                    .or_insert_with(|| Arc::new(SessionContext::new(self.reader.clone())));
                (entry.value().clone(), true)
            }
        };
        session.touch();

        if created {
            debug!(session = %session_fingerprint(credential), "Context session created");
            self.enforce_capacity(credential);
        }
        session
    }

    /// Existing session for `credential`, without creating one.
    pub fn get(&self, credential: &str) -> Option<Arc<SessionContext>> {
        self.sessions.get(credential).map(|s| s.value().clone())
    }

    fn enforce_capacity(&self, keep: &str) {
        while self.sessions.len() > self.policy.max_sessions.max(1) {
            let oldest = self
                .sessions
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().last_access())
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    self.sessions.remove(&key);
                    info!(session = %session_fingerprint(&key), "Evicted least recently used context session");
                }
                None => break,
            }
        }
    }

    /// Drop sessions idle for longer than the policy TTL. Returns how many.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.policy.idle_ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.idle_for() <= ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "Evicted idle context sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Save the snapshot after a session changed. Failures are logged, not
    /// returned; the in-memory state stays authoritative.
    pub async fn persist(&self) {
        if self.snapshot_path.is_none() {
            return;
        }
        if let Err(e) = self.save_snapshot().await {
            warn!(error = %e, "Could not persist context snapshot");
        }
    }

    /// Persist all non-empty sessions to the configured snapshot file.
    ///
    /// Does nothing when no snapshot path is configured. The file is
    /// replaced atomically, so a crash mid-write leaves the previous one.
    pub async fn save_snapshot(&self) -> Result<usize, ContextError> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(0);
        };
        let _writer = self.write_lock.lock().await;

        let snapshot = Snapshot {
            sessions: self
                .sessions
                .iter()
                .filter(|entry| !entry.value().is_empty())
                .map(|entry| (entry.key().clone(), entry.value().list_items()))
                .collect(),
        };
        let count = snapshot.sessions.len();

        let body = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ContextError::Snapshot(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ContextError::Snapshot(e.to_string()))?;
        }
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| ContextError::Snapshot(e.to_string()))?;
        tokio::fs::rename(&staging, path)
            .await
            .map_err(|e| ContextError::Snapshot(e.to_string()))?;

        debug!(sessions = count, path = %path.display(), "Context snapshot saved");
        Ok(count)
    }

    /// Restore sessions from the snapshot file, if one exists.
    ///
    /// A missing file is not an error. Restored sessions replace any live
    /// session under the same credential.
    pub async fn load_snapshot(&self) -> Result<usize, ContextError> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(0);
        };

        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No context snapshot to restore");
                return Ok(0);
            }
            Err(e) => return Err(ContextError::Snapshot(e.to_string())),
        };

        let snapshot: Snapshot =
            serde_json::from_slice(&body).map_err(|e| ContextError::Snapshot(e.to_string()))?;
        let count = snapshot.sessions.len();
        for (credential, items) in snapshot.sessions {
            let session = SessionContext::restore(self.reader.clone(), items);
            self.sessions.insert(credential, Arc::new(session));
        }
        if self.sessions.len() > self.policy.max_sessions {
            warn!(
                sessions = self.sessions.len(),
                max = self.policy.max_sessions,
                "Snapshot holds more sessions than allowed; extra sessions will be evicted as new ones arrive"
            );
        }

        info!(sessions = count, path = %path.display(), "Context snapshot restored");
        Ok(count)
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("sessions", &self.sessions.len())
            .field("policy", &self.policy)
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}
