//! Edge types and the condition predicates that select them.
//!
//! Edges carry control between nodes. A condition is evaluated against the
//! pair `(last_verdict, memory)`; for a given source exactly one edge
//! fires, with declaration order breaking ties. Retry loops are ordinary
//! edges whose target is their own source.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::memory::Memory;
use crate::types::{NodeId, Verdict};

/// Predicate attached to an edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "condition")]
pub enum EdgeCondition {
    /// Fires when the source node completed successfully (verdict ACCEPT,
    /// which is also what function nodes report on success).
    OnSuccess,
    /// Fires when the source node's judge returned the given verdict.
    OnVerdict { verdict: Verdict },
    /// Fires when the memory value under `key` equals `value`.
    OnOutputEquals { key: String, value: Value },
    /// Fires when `key` is present in memory.
    OnOutputPresent { key: String },
    /// Always fires.
    Always,
}

impl EdgeCondition {
    /// Evaluate this condition against the last verdict and current memory.
    #[must_use]
    pub fn matches(&self, last_verdict: Option<Verdict>, memory: &Memory) -> bool {
        match self {
            EdgeCondition::OnSuccess => last_verdict == Some(Verdict::Accept),
            EdgeCondition::OnVerdict { verdict } => last_verdict == Some(*verdict),
            EdgeCondition::OnOutputEquals { key, value } => memory.get(key) == Some(value),
            EdgeCondition::OnOutputPresent { key } => memory.contains_key(key),
            EdgeCondition::Always => true,
        }
    }
}

impl fmt::Display for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeCondition::OnSuccess => write!(f, "on_success"),
            EdgeCondition::OnVerdict { verdict } => write!(f, "on_verdict({verdict})"),
            EdgeCondition::OnOutputEquals { key, .. } => write!(f, "on_output_equals({key})"),
            EdgeCondition::OnOutputPresent { key } => write!(f, "on_output_present({key})"),
            EdgeCondition::Always => write!(f, "always"),
        }
    }
}

/// A directed edge in the graph.
///
/// In document form the condition is flattened into the edge object:
/// `{"source": "a", "target": "b", "condition": "on_success"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(flatten)]
    pub condition: EdgeCondition,
}

impl Edge {
    #[must_use]
    pub fn new(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        condition: EdgeCondition,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn on_success_matches_accept_only() {
        let mem = Memory::new();
        let cond = EdgeCondition::OnSuccess;
        assert!(cond.matches(Some(Verdict::Accept), &mem));
        assert!(!cond.matches(Some(Verdict::Retry), &mem));
        assert!(!cond.matches(None, &mem));
    }

    #[test]
    fn output_conditions_read_memory() {
        let mut mem = Memory::new();
        mem.write("route".into(), json!("fast"), "router", 1);

        assert!(EdgeCondition::OnOutputPresent { key: "route".into() }.matches(None, &mem));
        assert!(
            EdgeCondition::OnOutputEquals {
                key: "route".into(),
                value: json!("fast"),
            }
            .matches(None, &mem)
        );
        assert!(
            !EdgeCondition::OnOutputEquals {
                key: "route".into(),
                value: json!("slow"),
            }
            .matches(None, &mem)
        );
    }

    #[test]
    fn always_matches_anything() {
        let mem = Memory::new();
        assert!(EdgeCondition::Always.matches(None, &mem));
        assert!(EdgeCondition::Always.matches(Some(Verdict::Escalate), &mem));
    }
}
