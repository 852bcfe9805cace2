//! Step records: the append-only unit of the runtime event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{NodeId, RunId};

/// What happened in one indivisible step of a visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    LlmCall,
    ToolCall,
    ToolResult,
    SetOutput,
    JudgeVerdict,
    UserInputRequest,
    UserInputReceived,
}

impl StepKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::LlmCall => "llm_call",
            StepKind::ToolCall => "tool_call",
            StepKind::ToolResult => "tool_result",
            StepKind::SetOutput => "set_output",
            StepKind::JudgeVerdict => "judge_verdict",
            StepKind::UserInputRequest => "user_input_request",
            StepKind::UserInputReceived => "user_input_received",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended event-log entry, totally ordered within a run by `step_no`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: RunId,
    pub node_id: NodeId,
    pub step_no: u64,
    pub kind: StepKind,
    pub payload: Value,
    pub tokens_used: u64,
    pub latency_ms: u64,
    pub ts: DateTime<Utc>,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}@{}] #{} {}",
            self.node_id, self.run_id, self.step_no, self.kind
        )
    }
}

/// Record-in-the-making handed to [`EventLog::append`](crate::events::EventLog::append);
/// the log allocates `step_no` and stamps `ts`.
#[derive(Clone, Debug)]
pub struct StepDraft {
    pub run_id: RunId,
    pub node_id: NodeId,
    pub kind: StepKind,
    pub payload: Value,
    pub tokens_used: u64,
    pub latency_ms: u64,
}

impl StepDraft {
    #[must_use]
    pub fn new(
        run_id: impl Into<RunId>,
        node_id: impl Into<NodeId>,
        kind: StepKind,
        payload: Value,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
            kind,
            payload,
            tokens_used: 0,
            latency_ms: 0,
        }
    }

    #[must_use]
    pub fn with_usage(mut self, tokens_used: u64, latency_ms: u64) -> Self {
        self.tokens_used = tokens_used;
        self.latency_ms = latency_ms;
        self
    }
}
