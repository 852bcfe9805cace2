/*!
Persistence primitives for serializing/deserializing sessions and
checkpoints (used by the file-backed session store and any future durable
backends).

Design goals:
- Explicit serde-friendly structs decoupled from in-memory representations,
  so internal refactors never silently change the on-disk format.
- Conversion logic localized in From / TryFrom impls so store code stays
  lean and declarative.
- Forward compatibility: timestamps travel as RFC3339 strings and status /
  checkpoint kinds as their encoded string forms.

This module intentionally does NOT perform I/O.
*/

use chrono::Utc;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{Checkpoint, CheckpointKind, ExecutionState, Session};
use crate::types::SessionStatus;
use crate::utils::JsonSerializable;

/// Blanket implementation of JsonSerializable for all suitable types using
/// PersistenceError.
impl<T> JsonSerializable<PersistenceError> for T
where
    T: serde::Serialize + for<'de> serde::de::DeserializeOwned,
{
    fn to_json_string(&self) -> std::result::Result<String, PersistenceError> {
        serde_json::to_string(self).map_err(|e| PersistenceError::Serde { source: e })
    }

    fn from_json_str(s: &str) -> std::result::Result<Self, PersistenceError> {
        serde_json::from_str(s).map_err(|e| PersistenceError::Serde { source: e })
    }
}

/// Persisted form of one checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub id: String,
    /// RFC3339 string form of the checkpoint time.
    pub ts: String,
    /// Encoded [`CheckpointKind`].
    pub kind: String,
    pub state: ExecutionState,
}

/// Persisted form of a whole session (state blob + ordered checkpoints).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedSession {
    pub session_id: String,
    pub agent_name: String,
    /// Encoded [`SessionStatus`].
    pub status: String,
    pub execution_state: ExecutionState,
    #[serde(default)]
    pub checkpoints: Vec<PersistedCheckpoint>,
    pub created_at: String,
    pub updated_at: String,
}

/// Conversion and serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(
        code(agentloom::persistence::serde),
        help("Ensure the JSON structure matches the Persisted* types.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("persistence error: {0}")]
    #[diagnostic(code(agentloom::persistence::other))]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

fn encode_checkpoint_kind(kind: CheckpointKind) -> &'static str {
    match kind {
        CheckpointKind::NodeEntry => "node_entry",
        CheckpointKind::NodeComplete => "node_complete",
        CheckpointKind::Pause => "pause",
        CheckpointKind::Periodic => "periodic",
    }
}

fn decode_checkpoint_kind(s: &str) -> CheckpointKind {
    match s {
        "node_entry" => CheckpointKind::NodeEntry,
        "node_complete" => CheckpointKind::NodeComplete,
        "pause" => CheckpointKind::Pause,
        _ => CheckpointKind::Periodic,
    }
}

fn parse_ts(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/* ---------- Checkpoint <-> PersistedCheckpoint ---------- */

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            id: cp.id.clone(),
            ts: cp.ts.to_rfc3339(),
            kind: encode_checkpoint_kind(cp.kind).to_string(),
            state: cp.state.clone(),
        }
    }
}

impl From<PersistedCheckpoint> for Checkpoint {
    fn from(p: PersistedCheckpoint) -> Self {
        Checkpoint {
            id: p.id,
            ts: parse_ts(&p.ts),
            kind: decode_checkpoint_kind(&p.kind),
            state: p.state,
        }
    }
}

/* ---------- Session <-> PersistedSession ---------- */

impl From<&Session> for PersistedSession {
    fn from(s: &Session) -> Self {
        PersistedSession {
            session_id: s.session_id.clone(),
            agent_name: s.agent_name.clone(),
            status: s.status.encode().to_string(),
            execution_state: s.execution_state.clone(),
            checkpoints: s.checkpoints.iter().map(PersistedCheckpoint::from).collect(),
            created_at: s.created_at.to_rfc3339(),
            updated_at: s.updated_at.to_rfc3339(),
        }
    }
}

impl From<PersistedSession> for Session {
    fn from(p: PersistedSession) -> Self {
        Session {
            session_id: p.session_id,
            agent_name: p.agent_name,
            status: SessionStatus::decode(&p.status),
            execution_state: p.execution_state,
            checkpoints: p.checkpoints.into_iter().map(Checkpoint::from).collect(),
            created_at: parse_ts(&p.created_at),
            updated_at: parse_ts(&p.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_round_trips_through_persisted_form() {
        let mut session = Session::create("triage", json!({"ticket": "T-9"}));
        session
            .checkpoints
            .push(Checkpoint::capture(CheckpointKind::NodeEntry, &session.execution_state));
        session.status = SessionStatus::Paused;

        let persisted = PersistedSession::from(&session);
        let json = persisted.to_json_string().unwrap();
        let back: PersistedSession = PersistedSession::from_json_str(&json).unwrap();
        let restored = Session::from(back);

        assert_eq!(restored.session_id, session.session_id);
        assert_eq!(restored.status, SessionStatus::Paused);
        assert_eq!(restored.checkpoints.len(), 1);
        assert_eq!(
            restored.checkpoints[0].kind,
            CheckpointKind::NodeEntry
        );
        assert_eq!(
            restored.execution_state.memory.get("ticket"),
            session.execution_state.memory.get("ticket")
        );
    }

    #[test]
    fn checkpoint_kind_encoding_is_stable() {
        for kind in [
            CheckpointKind::NodeEntry,
            CheckpointKind::NodeComplete,
            CheckpointKind::Pause,
            CheckpointKind::Periodic,
        ] {
            assert_eq!(decode_checkpoint_kind(encode_checkpoint_kind(kind)), kind);
        }
    }
}
