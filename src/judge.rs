//! Verdict adjudication.
//!
//! After an event-loop node proposes outputs (or finishes an iteration
//! without any), the judge decides what happens next: accept the visit,
//! retry with feedback, escalate, or let the node continue working.
//!
//! `evaluate` must be pure with respect to its inputs — same node, memory,
//! and goal always yield the same evaluation. Stateful policies (attempt
//! budgets, cooldowns) belong to the executor's visit and step limits, not
//! to the judge.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::goal::{Constraint, Goal};
use crate::graph::NodeSpec;
use crate::memory::Memory;
use crate::types::Verdict;

/// Outcome of one judge evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Specific feedback carried into the next iteration on RETRY.
    pub feedback: Option<String>,
    /// Ids of goal constraints the evaluation found violated.
    pub violated_constraints: Vec<String>,
}

impl Evaluation {
    #[must_use]
    pub fn accept() -> Self {
        Self {
            verdict: Verdict::Accept,
            feedback: None,
            violated_constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn retry(feedback: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Retry,
            feedback: Some(feedback.into()),
            violated_constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn escalate(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Escalate,
            feedback: Some(reason.into()),
            violated_constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn proceed() -> Self {
        Self {
            verdict: Verdict::Continue,
            feedback: None,
            violated_constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_violations(mut self, ids: Vec<String>) -> Self {
        self.violated_constraints = ids;
        self
    }
}

/// Adjudicates a node's progress against the goal.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Evaluate the node's current outputs in memory against the goal.
    /// Pure with respect to its inputs.
    async fn evaluate(&self, node: &NodeSpec, memory: &Memory, goal: &Goal) -> Evaluation;
}

/// Pluggable check deciding whether a constraint is violated given memory.
pub type ConstraintCheck = Arc<dyn Fn(&Constraint, &Memory) -> bool + Send + Sync>;

/// Default judge: success criteria scoped to the node's output keys.
///
/// A criterion applies to a node iff its `metric` names one of the node's
/// `output_keys`. A criterion is met when the memory value equals the
/// criterion's `target`; a `null` target means "present and non-empty".
///
/// - ACCEPT when every scoped criterion is met and no hard constraint is
///   violated.
/// - RETRY citing the first failed criterion otherwise.
/// - ESCALATE when a hard constraint is violated (the executor aborts the
///   run on that evaluation).
///
/// Constraint checking defaults to "never violated"; install a
/// [`ConstraintCheck`] to wire real detection.
pub struct CriteriaJudge {
    constraint_check: Option<ConstraintCheck>,
}

impl Default for CriteriaJudge {
    fn default() -> Self {
        Self::new()
    }
}

impl CriteriaJudge {
    #[must_use]
    pub fn new() -> Self {
        Self {
            constraint_check: None,
        }
    }

    #[must_use]
    pub fn with_constraint_check(mut self, check: ConstraintCheck) -> Self {
        self.constraint_check = Some(check);
        self
    }

    fn criterion_met(target: &Value, actual: Option<&Value>) -> bool {
        match (target, actual) {
            (_, None) => false,
            (Value::Null, Some(actual)) => match actual {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
                _ => true,
            },
            (target, Some(actual)) => target == actual,
        }
    }
}

#[async_trait]
impl Judge for CriteriaJudge {
    async fn evaluate(&self, node: &NodeSpec, memory: &Memory, goal: &Goal) -> Evaluation {
        let violated: Vec<String> = match &self.constraint_check {
            Some(check) => goal
                .hard_constraints()
                .filter(|c| check(c, memory))
                .map(|c| c.id.clone())
                .collect(),
            None => Vec::new(),
        };
        if !violated.is_empty() {
            let first = violated[0].clone();
            return Evaluation::escalate(format!("hard constraint violated: {first}"))
                .with_violations(violated);
        }

        for criterion in goal.criteria_for_keys(&node.output_keys) {
            if !Self::criterion_met(&criterion.target, memory.get(&criterion.metric)) {
                return Evaluation::retry(format!(
                    "criterion {} not met: {} (key {:?})",
                    criterion.id, criterion.description, criterion.metric
                ));
            }
        }
        Evaluation::accept()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::ConstraintKind;
    use serde_json::json;

    fn node_with_outputs(keys: &[&str]) -> NodeSpec {
        NodeSpec::event_loop("n").with_output_keys(keys.iter().copied())
    }

    #[tokio::test]
    async fn accepts_when_scoped_criteria_met() {
        let goal = Goal::builder("g")
            .criterion("has-summary", "summary", json!(null), 1.0)
            .criterion("other-node", "score", json!(10), 1.0)
            .build();
        let mut memory = Memory::new();
        memory.write("summary".into(), json!("all good"), "n", 1);

        let eval = CriteriaJudge::new()
            .evaluate(&node_with_outputs(&["summary"]), &memory, &goal)
            .await;
        assert_eq!(eval.verdict, Verdict::Accept);
    }

    #[tokio::test]
    async fn retries_with_feedback_naming_the_criterion() {
        let goal = Goal::builder("g")
            .criterion("has-summary", "summary", json!(null), 1.0)
            .build();
        let mut memory = Memory::new();
        memory.write("summary".into(), json!(""), "n", 1);

        let eval = CriteriaJudge::new()
            .evaluate(&node_with_outputs(&["summary"]), &memory, &goal)
            .await;
        assert_eq!(eval.verdict, Verdict::Retry);
        assert!(eval.feedback.unwrap().contains("has-summary"));
    }

    #[tokio::test]
    async fn hard_constraint_violation_escalates() {
        let goal = Goal::builder("g")
            .constraint("no-pii", "no PII in outputs", ConstraintKind::Hard, "privacy")
            .build();
        let mut memory = Memory::new();
        memory.write("summary".into(), json!("ssn: 123"), "n", 1);

        let judge = CriteriaJudge::new().with_constraint_check(Arc::new(|_c, mem| {
            mem.get("summary")
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains("ssn"))
        }));
        let eval = judge
            .evaluate(&node_with_outputs(&["summary"]), &memory, &goal)
            .await;
        assert_eq!(eval.verdict, Verdict::Escalate);
        assert_eq!(eval.violated_constraints, vec!["no-pii".to_string()]);
    }

    #[tokio::test]
    async fn unscoped_criteria_are_ignored() {
        let goal = Goal::builder("g")
            .criterion("elsewhere", "score", json!(10), 1.0)
            .build();
        let memory = Memory::new();
        let eval = CriteriaJudge::new()
            .evaluate(&node_with_outputs(&["summary"]), &memory, &goal)
            .await;
        assert_eq!(eval.verdict, Verdict::Accept);
    }
}
