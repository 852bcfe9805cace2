//! Goals: what a run is trying to achieve, and how success is adjudicated.
//!
//! A [`Goal`] bundles a description with weighted [`SuccessCriterion`]
//! entries (consulted by the judge) and hard/soft [`Constraint`]s (hard
//! constraints can abort a run). Goals are immutable after the executor
//! accepts them; validation happens once via [`Goal::validate`].
//!
//! # Examples
//!
//! ```
//! use agentloom::goal::{Goal, ConstraintKind};
//! use serde_json::json;
//!
//! let goal = Goal::builder("summarize-ticket")
//!     .description("Produce a one-paragraph summary of the support ticket")
//!     .criterion("non-empty", "summary", json!(null), 1.0)
//!     .constraint("no-pii", "Never include customer PII", ConstraintKind::Hard, "privacy")
//!     .build();
//!
//! assert!(goal.validate().is_ok());
//! assert_eq!(goal.hard_constraints().count(), 1);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// A single measurable criterion consulted by the judge.
///
/// `metric` names the memory key the criterion applies to; a criterion is
/// in scope for a node iff that key is one of the node's declared output
/// keys. `target` is compared against the memory value; a `null` target
/// means "present and non-empty".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    pub id: String,
    pub description: String,
    /// Memory key this criterion measures.
    pub metric: String,
    /// Expected value; `null` means "present and non-empty".
    pub target: Value,
    pub weight: f64,
}

/// Whether a violated constraint aborts the run or merely flags it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Hard,
    Soft,
}

/// A goal-level constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub description: String,
    pub kind: ConstraintKind,
    pub category: String,
}

/// The declared objective of a run.
///
/// Created once, validated by the executor at run start, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    pub success_criteria: Vec<SuccessCriterion>,
    pub constraints: Vec<Constraint>,
}

impl Goal {
    /// Start building a goal with the given id.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> GoalBuilder {
        GoalBuilder {
            id: id.into(),
            description: String::new(),
            success_criteria: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Validate the goal for acceptance by the executor.
    ///
    /// Rules: non-empty id, unique criterion and constraint ids,
    /// non-negative weights, non-empty metrics.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::GoalInvalid {
                reason: "goal id must be non-empty".into(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for c in &self.success_criteria {
            if !seen.insert(c.id.as_str()) {
                return Err(CoreError::GoalInvalid {
                    reason: format!("duplicate success criterion id: {}", c.id),
                });
            }
            if c.metric.trim().is_empty() {
                return Err(CoreError::GoalInvalid {
                    reason: format!("criterion {} has an empty metric", c.id),
                });
            }
            if !c.weight.is_finite() || c.weight < 0.0 {
                return Err(CoreError::GoalInvalid {
                    reason: format!("criterion {} has invalid weight {}", c.id, c.weight),
                });
            }
        }
        let mut seen = std::collections::HashSet::new();
        for c in &self.constraints {
            if !seen.insert(c.id.as_str()) {
                return Err(CoreError::GoalInvalid {
                    reason: format!("duplicate constraint id: {}", c.id),
                });
            }
        }
        Ok(())
    }

    /// Iterate hard constraints only.
    pub fn hard_constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::Hard)
    }

    /// Look up a constraint by id.
    #[must_use]
    pub fn constraint(&self, id: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id == id)
    }

    /// Criteria whose metric is one of the given output keys.
    pub fn criteria_for_keys<'a>(
        &'a self,
        keys: &'a [String],
    ) -> impl Iterator<Item = &'a SuccessCriterion> {
        self.success_criteria
            .iter()
            .filter(move |c| keys.iter().any(|k| *k == c.metric))
    }
}

/// Fluent builder for [`Goal`].
pub struct GoalBuilder {
    id: String,
    description: String,
    success_criteria: Vec<SuccessCriterion>,
    constraints: Vec<Constraint>,
}

impl GoalBuilder {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a success criterion. The criterion's description defaults to its id.
    #[must_use]
    pub fn criterion(
        mut self,
        id: impl Into<String>,
        metric: impl Into<String>,
        target: Value,
        weight: f64,
    ) -> Self {
        let id = id.into();
        self.success_criteria.push(SuccessCriterion {
            description: id.clone(),
            id,
            metric: metric.into(),
            target,
            weight,
        });
        self
    }

    #[must_use]
    pub fn constraint(
        mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        kind: ConstraintKind,
        category: impl Into<String>,
    ) -> Self {
        self.constraints.push(Constraint {
            id: id.into(),
            description: description.into(),
            kind,
            category: category.into(),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Goal {
        Goal {
            id: self.id,
            description: self.description,
            success_criteria: self.success_criteria,
            constraints: self.constraints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_criterion_ids_rejected() {
        let goal = Goal::builder("g")
            .criterion("a", "x", json!(1), 1.0)
            .criterion("a", "y", json!(2), 1.0)
            .build();
        assert!(matches!(
            goal.validate(),
            Err(CoreError::GoalInvalid { .. })
        ));
    }

    #[test]
    fn negative_weight_rejected() {
        let goal = Goal::builder("g").criterion("a", "x", json!(1), -1.0).build();
        assert!(goal.validate().is_err());
    }

    #[test]
    fn criteria_scoping_by_output_keys() {
        let goal = Goal::builder("g")
            .criterion("a", "summary", json!(null), 1.0)
            .criterion("b", "score", json!(10), 1.0)
            .build();
        let keys = vec!["summary".to_string()];
        let scoped: Vec<_> = goal.criteria_for_keys(&keys).collect();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "a");
    }
}
