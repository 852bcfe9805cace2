//! Sessions: the durable envelope around a run.
//!
//! A [`Session`] owns the run's [`ExecutionState`] plus an ordered list of
//! [`Checkpoint`]s. Each checkpoint is a complete resumption point:
//! recovering from one re-enters the graph at `last_node_id` with the
//! snapshot's memory. Session ids are sortable (creation time prefix plus
//! a random suffix).

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event_loop::VisitState;
use crate::memory::Memory;
use crate::types::{NodeId, RunId, SessionStatus, Verdict};
use crate::utils::IdGenerator;

/// Everything the executor needs to continue a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub run_id: RunId,
    pub input: Value,
    pub memory: Memory,
    pub visit_counts: FxHashMap<NodeId, u32>,
    pub last_node_id: Option<NodeId>,
    pub last_verdict: Option<Verdict>,
    /// Run-level step counter (mirrors the event log's allocation).
    pub step_counter: u64,
    pub completed_nodes: FxHashSet<NodeId>,
    /// Node the run is paused at, if any.
    pub paused_at: Option<NodeId>,
    /// Serialized in-visit loop state when paused mid-visit.
    pub paused_visit: Option<VisitState>,
    /// User reply staged for a suspended client-facing visit.
    pub pending_user_input: Option<String>,
    pub failed_nodes: FxHashMap<NodeId, String>,
}

impl ExecutionState {
    /// Fresh state with memory seeded from the input.
    #[must_use]
    pub fn new(run_id: impl Into<RunId>, input: Value) -> Self {
        let mut memory = Memory::new();
        memory.seed_input(&input);
        Self {
            run_id: run_id.into(),
            input,
            memory,
            visit_counts: FxHashMap::default(),
            last_node_id: None,
            last_verdict: None,
            step_counter: 0,
            completed_nodes: FxHashSet::default(),
            paused_at: None,
            paused_visit: None,
            pending_user_input: None,
            failed_nodes: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn visit_count(&self, node_id: &str) -> u32 {
        self.visit_counts.get(node_id).copied().unwrap_or(0)
    }

    /// Count one visit of `node_id` and return the new total.
    pub fn record_visit(&mut self, node_id: &str) -> u32 {
        let count = self.visit_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Why a checkpoint was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// A node began a visit.
    NodeEntry,
    /// A node exited with ACCEPT.
    NodeComplete,
    /// The run suspended (user input or an explicit pause).
    Pause,
    /// Cadence checkpoint between steps of a long event loop.
    Periodic,
}

/// A durable snapshot of execution state at a boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub kind: CheckpointKind,
    pub state: ExecutionState,
}

impl Checkpoint {
    /// Snapshot the given state now, minting a sortable checkpoint id.
    #[must_use]
    pub fn capture(kind: CheckpointKind, state: &ExecutionState) -> Self {
        Self {
            id: IdGenerator::new().checkpoint_id(),
            ts: Utc::now(),
            kind,
            state: state.clone(),
        }
    }
}

/// The durable envelope: id, status, state, ordered checkpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub agent_name: String,
    pub status: SessionStatus,
    pub execution_state: ExecutionState,
    pub checkpoints: Vec<Checkpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an active session around a fresh run. The session id doubles
    /// as the run id.
    #[must_use]
    pub fn create(agent_name: impl Into<String>, input: Value) -> Self {
        let session_id = IdGenerator::new().session_id();
        let now = Utc::now();
        Self {
            execution_state: ExecutionState::new(session_id.clone(), input),
            session_id,
            agent_name: agent_name.into(),
            status: SessionStatus::Active,
            checkpoints: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.status.is_resumable()
    }

    #[must_use]
    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    #[must_use]
    pub fn checkpoint(&self, id: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|cp| cp.id == id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_id_is_run_id() {
        let session = Session::create("triage", json!({"ticket": "T-1"}));
        assert_eq!(session.session_id, session.execution_state.run_id);
        assert!(session.session_id.starts_with("sess-"));
    }

    #[test]
    fn input_seeds_memory() {
        let session = Session::create("triage", json!({"ticket": "T-1"}));
        assert_eq!(
            session.execution_state.memory.get("ticket"),
            Some(&json!("T-1"))
        );
    }

    #[test]
    fn visit_counting() {
        let mut state = ExecutionState::new("r", json!({}));
        assert_eq!(state.visit_count("n"), 0);
        assert_eq!(state.record_visit("n"), 1);
        assert_eq!(state.record_visit("n"), 2);
    }

    #[test]
    fn checkpoint_lookup_by_id() {
        let state = ExecutionState::new("r", json!({}));
        let mut session = Session::create("a", json!({}));
        let cp = Checkpoint::capture(CheckpointKind::NodeEntry, &state);
        let id = cp.id.clone();
        session.checkpoints.push(cp);
        assert!(session.checkpoint(&id).is_some());
        assert!(session.checkpoint("cp-missing").is_none());
    }
}
