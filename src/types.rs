//! Core types for the agentloom runtime.
//!
//! This module defines the fundamental vocabulary used throughout the system
//! for identifying nodes, classifying their behavior, and naming the
//! decisions that drive control flow. These are the core domain concepts
//! that define what a run *is*.
//!
//! For session/durability types (session ids, checkpoints), see
//! [`crate::session`].
//!
//! # Key Types
//!
//! - [`NodeKind`]: How a node executes (event loop, function, client-facing, terminal)
//! - [`Verdict`]: The judge's decision after a node proposes outputs
//! - [`Termination`]: Why a run stopped
//! - [`SessionStatus`]: Lifecycle state of a durable session

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node within a graph.
///
/// Node ids are plain strings chosen by the graph author; they must be
/// unique within a graph and stable across runs (checkpoints reference them).
pub type NodeId = String;

/// Identifier of a single run. Equal to the session id that envelopes it.
pub type RunId = String;

/// Classifies how a node executes.
///
/// # Persistence
///
/// `NodeKind` supports serialization for checkpointing through both serde
/// and the [`encode`](Self::encode)/[`decode`](Self::decode) methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Interleaves LLM steps, tool calls, and judge verdicts until the
    /// judge accepts, escalates, or the step budget runs out.
    EventLoop,

    /// A pure mapping from declared input keys to declared output keys.
    /// No LLM, no tools, no judge.
    Function,

    /// An event loop that must request (and receive) user input before it
    /// may call `set_output`. Suspends the run while waiting.
    ClientFacingEventLoop,

    /// Reaching a terminal node completes the run.
    Terminal,
}

impl NodeKind {
    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            NodeKind::EventLoop => "event_loop",
            NodeKind::Function => "function",
            NodeKind::ClientFacingEventLoop => "client_facing_event_loop",
            NodeKind::Terminal => "terminal",
        }
    }

    /// Decode a persisted string form. Unknown encodings fall back to
    /// [`NodeKind::Function`] so old checkpoints stay loadable.
    pub fn decode(s: &str) -> Self {
        match s {
            "event_loop" => NodeKind::EventLoop,
            "client_facing_event_loop" => NodeKind::ClientFacingEventLoop,
            "terminal" => NodeKind::Terminal,
            _ => NodeKind::Function,
        }
    }

    /// Returns `true` for both event-loop flavors.
    #[must_use]
    pub fn is_event_loop(&self) -> bool {
        matches!(self, NodeKind::EventLoop | NodeKind::ClientFacingEventLoop)
    }

    /// Returns `true` if this node completes the run on entry.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeKind::Terminal)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// The judge's decision after evaluating a node's proposed outputs against
/// the goal.
///
/// Tie-breaking when multiple verdicts apply: `Escalate` beats `Retry`,
/// `Retry` beats `Continue`, `Accept` beats `Continue`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Every required criterion is met; the node's visit is complete.
    Accept,
    /// Criteria unmet but progress is achievable; re-run the loop with
    /// feedback. Memory is not mutated by a retry.
    Retry,
    /// Unrecoverable within this node; route along an escalate edge or
    /// terminate the run.
    Escalate,
    /// More work remains inside the current visit (event-loop nodes only).
    Continue,
}

impl Verdict {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accept => "ACCEPT",
            Verdict::Retry => "RETRY",
            Verdict::Escalate => "ESCALATE",
            Verdict::Continue => "CONTINUE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Execution reached a terminal node.
    TerminalNode,
    /// No outgoing edge matched `(last_verdict, memory)`.
    NoValidEdge,
    /// A hard goal constraint was violated.
    HardConstraint,
    /// A node exceeded its `max_visits` bound with no escalate edge.
    MaxVisits,
    /// A pause was requested; the session is resumable.
    PauseRequested,
    /// The run was cancelled; the session is not resumable.
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::TerminalNode => "terminal_node",
            Termination::NoValidEdge => "no_valid_edge",
            Termination::HardConstraint => "hard_constraint",
            Termination::MaxVisits => "max_visits",
            Termination::PauseRequested => "pause_requested",
            Termination::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a durable session.
///
/// Only `Paused` and `Failed` sessions are resumable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Decode a persisted string form. Unknown encodings decode to
    /// `Failed`, the conservative resumable state.
    pub fn decode(s: &str) -> Self {
        match s {
            "active" => SessionStatus::Active,
            "paused" => SessionStatus::Paused,
            "completed" => SessionStatus::Completed,
            "cancelled" => SessionStatus::Cancelled,
            _ => SessionStatus::Failed,
        }
    }

    /// Interrupted runs are resumable iff the session is paused or failed.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(self, SessionStatus::Paused | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}
