use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::step::StepRecord;
use crate::types::{RunId, SessionStatus};

/// Everything a downstream observer can see happen.
///
/// Observers subscribe through the hub and can never mutate state; the
/// event log remains the durable record, this enum is the live feed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum RuntimeEvent {
    /// A step was appended to the event log.
    Step(StepRecord),
    /// A run changed lifecycle status (entered a node, paused, finished…).
    RunStatus {
        run_id: RunId,
        status: SessionStatus,
    },
    /// Free-form diagnostic from the executor or a store.
    Diagnostic { scope: String, message: String },
}

impl RuntimeEvent {
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeEvent::Diagnostic {
            scope: scope.into(),
            message: message.into(),
        }
    }

    pub fn run_status(run_id: impl Into<RunId>, status: SessionStatus) -> Self {
        RuntimeEvent::RunStatus {
            run_id: run_id.into(),
            status,
        }
    }

    /// Structured JSON form with a normalized `type` discriminator.
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            RuntimeEvent::Step(step) => json!({
                "type": "step",
                "run_id": step.run_id,
                "node_id": step.node_id,
                "step_no": step.step_no,
                "kind": step.kind.as_str(),
                "payload": step.payload,
                "tokens_used": step.tokens_used,
                "latency_ms": step.latency_ms,
                "ts": step.ts.to_rfc3339(),
            }),
            RuntimeEvent::RunStatus { run_id, status } => json!({
                "type": "run_status",
                "run_id": run_id,
                "status": status.encode(),
            }),
            RuntimeEvent::Diagnostic { scope, message } => json!({
                "type": "diagnostic",
                "scope": scope,
                "message": message,
            }),
        }
    }
}

impl fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeEvent::Step(step) => write!(f, "{step}"),
            RuntimeEvent::RunStatus { run_id, status } => {
                write!(f, "run {run_id} -> {status}")
            }
            RuntimeEvent::Diagnostic { scope, message } => write!(f, "[{scope}] {message}"),
        }
    }
}
