//! Durable session storage.
//!
//! A [`SessionStore`] keeps one state blob plus an ordered checkpoint list
//! per session. Writes to the same session are serialized; the file
//! backend additionally writes through a temp file and an atomic rename so
//! a crash never leaves partial state on disk.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::error::CoreError;
use crate::persistence::PersistedSession;
use crate::session::{Checkpoint, ExecutionState, Session};
use crate::types::SessionStatus;
use crate::utils::JsonSerializable;

/// Errors from session store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Session was not found in the store.
    #[error("session not found: {session_id}")]
    #[diagnostic(code(agentloom::session_store::not_found))]
    NotFound { session_id: String },

    /// Checkpoint id not present in the session's list.
    #[error("checkpoint not found: {checkpoint_id}")]
    #[diagnostic(code(agentloom::session_store::checkpoint_not_found))]
    CheckpointNotFound { checkpoint_id: String },

    /// Backend storage error (filesystem, serialization, ...).
    #[error("backend error: {message}")]
    #[diagnostic(
        code(agentloom::session_store::backend),
        help("Check store path permissions and disk space; backend message: {message}.")
    )]
    Backend { message: String },
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { session_id } => CoreError::SessionNotFound { session_id },
            other => CoreError::StorageFailure {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Trait for durable session state and checkpoint storage.
///
/// Implementations must keep `save_state` and `append_checkpoint` on the
/// same session from interleaving, and reads must observe consistent
/// snapshots.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a brand-new session envelope.
    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Replace the session's state blob.
    async fn save_state(&self, session_id: &str, state: &ExecutionState) -> Result<()>;

    /// Append one checkpoint to the session's ordered list.
    async fn append_checkpoint(&self, session_id: &str, checkpoint: Checkpoint) -> Result<()>;

    /// Load the full session envelope, or `None` if unknown.
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// List session ids, optionally filtered by agent name. Ids sort by
    /// creation time.
    async fn list_sessions(&self, agent: Option<&str>) -> Result<Vec<String>>;

    /// Update the session's lifecycle status.
    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()>;

    /// Drop every checkpoint after `checkpoint_id`, install that
    /// checkpoint's snapshot as the session state, and return it.
    async fn truncate_checkpoints_after(
        &self,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<Checkpoint>;
}

fn truncate_in_session(session: &mut Session, checkpoint_id: &str) -> Result<Checkpoint> {
    let idx = session
        .checkpoints
        .iter()
        .position(|cp| cp.id == checkpoint_id)
        .ok_or_else(|| StoreError::CheckpointNotFound {
            checkpoint_id: checkpoint_id.to_string(),
        })?;
    session.checkpoints.truncate(idx + 1);
    let checkpoint = session.checkpoints[idx].clone();
    session.execution_state = checkpoint.state.clone();
    session.touch();
    Ok(checkpoint)
}

/// Volatile store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemorySessionStore {
    inner: RwLock<FxHashMap<String, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        self.inner
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn save_state(&self, session_id: &str, state: &ExecutionState) -> Result<()> {
        let mut map = self.inner.write();
        let session = map.get_mut(session_id).ok_or_else(|| StoreError::NotFound {
            session_id: session_id.to_string(),
        })?;
        session.execution_state = state.clone();
        session.touch();
        Ok(())
    }

    async fn append_checkpoint(&self, session_id: &str, checkpoint: Checkpoint) -> Result<()> {
        let mut map = self.inner.write();
        let session = map.get_mut(session_id).ok_or_else(|| StoreError::NotFound {
            session_id: session_id.to_string(),
        })?;
        session.checkpoints.push(checkpoint);
        session.touch();
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.inner.read().get(session_id).cloned())
    }

    async fn list_sessions(&self, agent: Option<&str>) -> Result<Vec<String>> {
        let map = self.inner.read();
        let mut ids: Vec<String> = map
            .values()
            .filter(|s| agent.is_none_or(|a| s.agent_name == a))
            .map(|s| s.session_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let mut map = self.inner.write();
        let session = map.get_mut(session_id).ok_or_else(|| StoreError::NotFound {
            session_id: session_id.to_string(),
        })?;
        session.status = status;
        session.touch();
        Ok(())
    }

    async fn truncate_checkpoints_after(
        &self,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<Checkpoint> {
        let mut map = self.inner.write();
        let session = map.get_mut(session_id).ok_or_else(|| StoreError::NotFound {
            session_id: session_id.to_string(),
        })?;
        truncate_in_session(session, checkpoint_id)
    }
}

/// File-backed store: one JSON document per session under a root directory.
///
/// Writes go through `<root>/.tmp-<id>` then an atomic rename onto
/// `<root>/<id>.json`. Per-session mutexes serialize read-modify-write
/// cycles so `save_state` and `append_checkpoint` never interleave.
pub struct FileSessionStore {
    root: PathBuf,
    write_locks: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileSessionStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::Backend {
            message: format!("create {}: {e}", root.display()),
        })?;
        Ok(Self {
            root,
            write_locks: Mutex::new(FxHashMap::default()),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }

    fn write_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock();
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    fn read_session(&self, session_id: &str) -> Result<Option<Session>> {
        let path = self.session_path(session_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Backend {
                    message: format!("read {}: {e}", path.display()),
                });
            }
        };
        let persisted =
            PersistedSession::from_json_str(&raw).map_err(|e| StoreError::Backend {
                message: format!("decode {}: {e}", path.display()),
            })?;
        Ok(Some(Session::from(persisted)))
    }

    fn write_session(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.session_id);
        let json = PersistedSession::from(session)
            .to_json_string()
            .map_err(|e| StoreError::Backend {
                message: format!("encode session {}: {e}", session.session_id),
            })?;
        write_atomic(&self.root, &path, json.as_bytes()).map_err(|e| StoreError::Backend {
            message: format!("write {}: {e}", path.display()),
        })
    }

    async fn update<T>(
        &self,
        session_id: &str,
        apply: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let lock = self.write_lock(session_id);
        let _guard = lock.lock().await;
        let mut session = self
            .read_session(session_id)?
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })?;
        let out = apply(&mut session)?;
        self.write_session(&session)?;
        Ok(out)
    }
}

/// Write `bytes` to `path` via temp file + rename in `dir`.
pub(crate) fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "blob".to_string());
    let tmp = dir.join(format!(".tmp-{file_name}"));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let lock = self.write_lock(&session.session_id);
        let _guard = lock.lock().await;
        self.write_session(session)
    }

    async fn save_state(&self, session_id: &str, state: &ExecutionState) -> Result<()> {
        self.update(session_id, |session| {
            session.execution_state = state.clone();
            session.touch();
            Ok(())
        })
        .await
    }

    async fn append_checkpoint(&self, session_id: &str, checkpoint: Checkpoint) -> Result<()> {
        self.update(session_id, |session| {
            session.checkpoints.push(checkpoint);
            session.touch();
            Ok(())
        })
        .await
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.read_session(session_id)
    }

    async fn list_sessions(&self, agent: Option<&str>) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::Backend {
            message: format!("read dir {}: {e}", self.root.display()),
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            match agent {
                None => ids.push(id.to_string()),
                Some(agent) => {
                    if let Some(session) = self.read_session(id)? {
                        if session.agent_name == agent {
                            ids.push(id.to_string());
                        }
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.update(session_id, |session| {
            session.status = status;
            session.touch();
            Ok(())
        })
        .await
    }

    async fn truncate_checkpoints_after(
        &self,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<Checkpoint> {
        self.update(session_id, |session| truncate_in_session(session, checkpoint_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CheckpointKind;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemorySessionStore::new();
        let session = Session::create("triage", json!({"k": 1}));
        store.create_session(&session).await.unwrap();

        let loaded = store.load_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn truncate_discards_later_checkpoints() {
        let store = InMemorySessionStore::new();
        let mut session = Session::create("a", json!({}));
        let cp1 = Checkpoint::capture(CheckpointKind::NodeEntry, &session.execution_state);
        let mut later_state = session.execution_state.clone();
        later_state.record_visit("n");
        let cp2 = Checkpoint::capture(CheckpointKind::NodeComplete, &later_state);
        let cp1_id = cp1.id.clone();
        session.checkpoints = vec![cp1, cp2];
        store.create_session(&session).await.unwrap();

        let recovered = store
            .truncate_checkpoints_after(&session.session_id, &cp1_id)
            .await
            .unwrap();
        assert_eq!(recovered.id, cp1_id);

        let loaded = store.load_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.checkpoints.len(), 1);
        assert_eq!(loaded.execution_state.visit_count("n"), 0);
    }

    #[tokio::test]
    async fn unknown_session_errors() {
        let store = InMemorySessionStore::new();
        let err = store
            .save_state("missing", &ExecutionState::new("missing", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn file_store_round_trip_and_atomicity() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).unwrap();
        let mut session = Session::create("triage", json!({"ticket": "T-3"}));
        session.status = SessionStatus::Paused;
        store.create_session(&session).await.unwrap();

        let loaded = store.load_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Paused);
        assert_eq!(
            loaded.execution_state.memory.get("ticket"),
            Some(&json!("T-3"))
        );

        // No temp litter after a successful write.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn file_store_lists_by_agent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).unwrap();
        let a = Session::create("agent-a", json!({}));
        let b = Session::create("agent-b", json!({}));
        store.create_session(&a).await.unwrap();
        store.create_session(&b).await.unwrap();

        let all = store.list_sessions(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let only_a = store.list_sessions(Some("agent-a")).await.unwrap();
        assert_eq!(only_a, vec![a.session_id.clone()]);
    }
}
