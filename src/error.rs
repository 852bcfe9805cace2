//! Public error surface of the runtime core.
//!
//! Every error kind carries a human-readable message and a stable machine
//! code reachable via [`CoreError::code`]. Messages never contain secret
//! bytes; credential errors reference ids only.

use miette::Diagnostic;
use thiserror::Error;

use crate::types::SessionStatus;

/// Errors exposed at the public surface of the runtime.
///
/// Lower-tier failures (tool and LLM call errors inside an event-loop visit)
/// are captured in message history and never surface here; see the module
/// docs on [`crate::event_loop`] for the tiering rules.
#[derive(Debug, Error, Diagnostic)]
pub enum CoreError {
    /// The goal failed acceptance validation.
    #[error("invalid goal: {reason}")]
    #[diagnostic(
        code(agentloom::goal::invalid),
        help("Check criterion ids are unique and weights are non-negative.")
    )]
    GoalInvalid { reason: String },

    /// The graph failed structural validation.
    #[error("invalid graph: {reason}")]
    #[diagnostic(code(agentloom::graph::invalid))]
    GraphInvalid { reason: String },

    /// A node's whole-visit deadline elapsed.
    #[error("node {node_id} timed out")]
    #[diagnostic(code(agentloom::node::timeout))]
    NodeTimeout { node_id: String },

    /// A node exceeded its visit bound and no escalate edge was declared.
    #[error("node {node_id} exceeded max_visits ({max_visits})")]
    #[diagnostic(
        code(agentloom::node::max_visits),
        help("Raise max_visits or add an on_verdict(ESCALATE) edge from {node_id}.")
    )]
    NodeMaxVisits { node_id: String, max_visits: u32 },

    /// No outgoing edge matched the node's verdict and memory.
    #[error("no valid edge out of node {node_id}")]
    #[diagnostic(code(agentloom::graph::no_valid_edge))]
    NoValidEdge { node_id: String },

    /// A hard goal constraint was violated.
    #[error("hard constraint violated: {constraint_id}")]
    #[diagnostic(code(agentloom::goal::hard_constraint))]
    HardConstraintViolated { constraint_id: String },

    /// A declared tool does not resolve in the dispatcher.
    #[error("tool unavailable: {tool}")]
    #[diagnostic(
        code(agentloom::tools::unavailable),
        help("Every tool named by a node must resolve in the dispatcher at run start.")
    )]
    ToolUnavailable { tool: String },

    /// The LLM adapter is unreachable or misconfigured.
    #[error("LLM unavailable: {message}")]
    #[diagnostic(code(agentloom::llm::unavailable))]
    LlmUnavailable { message: String },

    /// No credential with the given id exists in any storage layer.
    #[error("credential not found: {id}")]
    #[diagnostic(code(agentloom::credentials::not_found))]
    CredentialNotFound { id: String },

    /// A provider refresh failed; the stale value is withheld.
    #[error("credential refresh failed for {id}: {message}")]
    #[diagnostic(code(agentloom::credentials::refresh))]
    CredentialRefreshError { id: String, message: String },

    /// Stored ciphertext failed authentication or decryption.
    #[error("credential storage corrupt for {id}")]
    #[diagnostic(
        code(agentloom::credentials::corrupt),
        help("The ciphertext was tampered with or the decryption key is wrong.")
    )]
    CredentialCorrupt { id: String },

    /// The session id is unknown to the session store.
    #[error("session not found: {session_id}")]
    #[diagnostic(code(agentloom::session::not_found))]
    SessionNotFound { session_id: String },

    /// The session exists but its status forbids resumption.
    #[error("session {session_id} is not resumable (status: {status})")]
    #[diagnostic(
        code(agentloom::session::not_resumable),
        help("Only paused or failed sessions can be resumed.")
    )]
    SessionNotResumable {
        session_id: String,
        status: SessionStatus,
    },

    /// The durable store failed while writing state or checkpoints.
    #[error("storage failure: {message}")]
    #[diagnostic(code(agentloom::storage::failure))]
    StorageFailure { message: String },

    /// The run was cancelled by an explicit `cancel` request.
    #[error("run cancelled: {run_id}")]
    #[diagnostic(code(agentloom::run::cancelled))]
    Cancelled { run_id: String },

    /// Two parallel branches wrote the same memory key.
    #[error("parallel branches both wrote memory key {key:?}")]
    #[diagnostic(
        code(agentloom::memory::branch_merge_conflict),
        help("Branches of a parallel batch must write disjoint output keys.")
    )]
    BranchMergeConflict { key: String },
}

impl CoreError {
    /// Stable machine code for the error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::GoalInvalid { .. } => "goal_invalid",
            CoreError::GraphInvalid { .. } => "graph_invalid",
            CoreError::NodeTimeout { .. } => "node_timeout",
            CoreError::NodeMaxVisits { .. } => "node_max_visits",
            CoreError::NoValidEdge { .. } => "no_valid_edge",
            CoreError::HardConstraintViolated { .. } => "hard_constraint_violated",
            CoreError::ToolUnavailable { .. } => "tool_unavailable",
            CoreError::LlmUnavailable { .. } => "llm_unavailable",
            CoreError::CredentialNotFound { .. } => "credential_not_found",
            CoreError::CredentialRefreshError { .. } => "credential_refresh_error",
            CoreError::CredentialCorrupt { .. } => "credential_corrupt",
            CoreError::SessionNotFound { .. } => "session_not_found",
            CoreError::SessionNotResumable { .. } => "session_not_resumable",
            CoreError::StorageFailure { .. } => "storage_failure",
            CoreError::Cancelled { .. } => "cancelled",
            CoreError::BranchMergeConflict { .. } => "branch_merge_conflict",
        }
    }
}
