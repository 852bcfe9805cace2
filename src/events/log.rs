//! The append-only runtime event log.
//!
//! Every step of every run lands here, keyed `(run_id, node_id, step_no)`.
//! `step_no` is allocated under a per-run lock, which gives each run a
//! total order even when parallel branches append concurrently. Queries
//! come in three shapes:
//!
//! - **L1**: run summaries with needs-attention flags
//! - **L2**: per-node roll-ups with verdict counts
//! - **L3**: raw ordered step records
//!
//! Appends also fan out through an optional emitter so observers can
//! subscribe live without touching the log.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::attention::{AttentionCategory, AttentionCounters};
use super::emitter::EventEmitter;
use super::event::RuntimeEvent;
use super::step::{StepDraft, StepKind, StepRecord};
use crate::types::{NodeId, RunId, SessionStatus, Verdict};

/// L1 query result: one row per run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: Option<SessionStatus>,
    pub needs_attention: bool,
    pub attention_categories: Vec<AttentionCategory>,
    pub duration_ms: u64,
    pub tokens: u64,
    pub total_steps: u64,
}

/// L2 query result: one row per node of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRollup {
    pub node_id: NodeId,
    /// Last judge verdict recorded for the node, if any.
    pub exit_status: Option<Verdict>,
    pub retry_count: u64,
    pub verdict_counts: FxHashMap<Verdict, u64>,
    pub attention_reasons: Vec<AttentionCategory>,
    pub steps: u64,
    pub tokens: u64,
}

#[derive(Default)]
struct RunLog {
    steps: Vec<StepRecord>,
    next_step_no: u64,
    status: Option<SessionStatus>,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
}

impl RunLog {
    fn counters(&self) -> AttentionCounters {
        let mut retry_count = 0;
        let mut escalate_count = 0;
        let mut tokens = 0;
        for step in &self.steps {
            tokens += step.tokens_used;
            if step.kind == StepKind::JudgeVerdict {
                match verdict_of(step) {
                    Some(Verdict::Retry) => retry_count += 1,
                    Some(Verdict::Escalate) => escalate_count += 1,
                    _ => {}
                }
            }
        }
        let duration_ms = match (self.first_ts, self.last_ts) {
            (Some(first), Some(last)) => (last - first).num_milliseconds().max(0) as u64,
            _ => 0,
        };
        AttentionCounters {
            retry_count,
            escalate_count,
            duration_ms,
            tokens,
            total_steps: self.steps.len() as u64,
        }
    }
}

fn verdict_of(step: &StepRecord) -> Option<Verdict> {
    step.payload
        .get("verdict")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

struct Inner {
    runs: RwLock<FxHashMap<RunId, Arc<Mutex<RunLog>>>>,
    emitter: Option<Arc<dyn EventEmitter>>,
}

/// Cheaply cloneable handle on the shared log.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Inner>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                runs: RwLock::new(FxHashMap::default()),
                emitter: None,
            }),
        }
    }

    /// A log that also forwards every append to the given emitter.
    #[must_use]
    pub fn with_emitter(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                runs: RwLock::new(FxHashMap::default()),
                emitter: Some(emitter),
            }),
        }
    }

    fn run_log(&self, run_id: &str) -> Arc<Mutex<RunLog>> {
        if let Some(log) = self.inner.runs.read().get(run_id) {
            return Arc::clone(log);
        }
        let mut runs = self.inner.runs.write();
        Arc::clone(runs.entry(run_id.to_string()).or_default())
    }

    fn existing_run_log(&self, run_id: &str) -> Option<Arc<Mutex<RunLog>>> {
        self.inner.runs.read().get(run_id).map(Arc::clone)
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(emitter) = &self.inner.emitter {
            if let Err(err) = emitter.emit(event) {
                tracing::debug!(error = %err, "event emission skipped");
            }
        }
    }

    /// Append a step; the log allocates `step_no` and stamps the time.
    pub fn append(&self, draft: StepDraft) -> StepRecord {
        let run_log = self.run_log(&draft.run_id);
        let record = {
            let mut log = run_log.lock();
            log.next_step_no += 1;
            let ts = Utc::now();
            if log.first_ts.is_none() {
                log.first_ts = Some(ts);
            }
            log.last_ts = Some(ts);
            let record = StepRecord {
                run_id: draft.run_id,
                node_id: draft.node_id,
                step_no: log.next_step_no,
                kind: draft.kind,
                payload: draft.payload,
                tokens_used: draft.tokens_used,
                latency_ms: draft.latency_ms,
                ts,
            };
            log.steps.push(record.clone());
            record
        };
        self.emit(RuntimeEvent::Step(record.clone()));
        record
    }

    /// Emit a diagnostic to observers without appending to the log.
    pub fn diagnostic(&self, scope: impl Into<String>, message: impl Into<String>) {
        self.emit(RuntimeEvent::diagnostic(scope, message));
    }

    /// Record a run's lifecycle status (reflected in L1 summaries).
    pub fn set_run_status(&self, run_id: &str, status: SessionStatus) {
        let run_log = self.run_log(run_id);
        run_log.lock().status = Some(status);
        self.emit(RuntimeEvent::run_status(run_id, status));
    }

    /// L3: raw ordered steps of a run, optionally filtered to one node.
    #[must_use]
    pub fn steps(&self, run_id: &str, node_id: Option<&str>) -> Vec<StepRecord> {
        let Some(run_log) = self.existing_run_log(run_id) else {
            return Vec::new();
        };
        let log = run_log.lock();
        log.steps
            .iter()
            .filter(|s| node_id.is_none_or(|n| s.node_id == n))
            .cloned()
            .collect()
    }

    /// Point lookup by full key.
    #[must_use]
    pub fn step(&self, run_id: &str, node_id: &str, step_no: u64) -> Option<StepRecord> {
        self.steps(run_id, Some(node_id))
            .into_iter()
            .find(|s| s.step_no == step_no)
    }

    /// L1: summaries for all runs, ordered by run id (ids sort by creation
    /// time).
    #[must_use]
    pub fn run_summaries(&self) -> Vec<RunSummary> {
        let mut ids: Vec<RunId> = self.inner.runs.read().keys().cloned().collect();
        ids.sort();
        ids.iter()
            .filter_map(|id| self.run_summary(id))
            .collect()
    }

    /// L1 for a single run.
    #[must_use]
    pub fn run_summary(&self, run_id: &str) -> Option<RunSummary> {
        let run_log = Arc::clone(self.inner.runs.read().get(run_id)?);
        let log = run_log.lock();
        let counters = log.counters();
        Some(RunSummary {
            run_id: run_id.to_string(),
            status: log.status,
            needs_attention: counters.needs_attention(),
            attention_categories: counters.categories(),
            duration_ms: counters.duration_ms,
            tokens: counters.tokens,
            total_steps: counters.total_steps,
        })
    }

    /// L2: per-node roll-ups for one run, in first-seen order.
    #[must_use]
    pub fn node_rollups(&self, run_id: &str) -> Vec<NodeRollup> {
        let Some(run_log) = self.existing_run_log(run_id) else {
            return Vec::new();
        };
        let log = run_log.lock();

        let mut order: Vec<NodeId> = Vec::new();
        let mut by_node: FxHashMap<&str, NodeRollup> = FxHashMap::default();
        for step in &log.steps {
            if !by_node.contains_key(step.node_id.as_str()) {
                order.push(step.node_id.clone());
                by_node.insert(
                    step.node_id.as_str(),
                    NodeRollup {
                        node_id: step.node_id.clone(),
                        exit_status: None,
                        retry_count: 0,
                        verdict_counts: FxHashMap::default(),
                        attention_reasons: Vec::new(),
                        steps: 0,
                        tokens: 0,
                    },
                );
            }
            let rollup = by_node
                .get_mut(step.node_id.as_str())
                .expect("rollup inserted above");
            rollup.steps += 1;
            rollup.tokens += step.tokens_used;
            if step.kind == StepKind::JudgeVerdict {
                if let Some(verdict) = verdict_of(step) {
                    *rollup.verdict_counts.entry(verdict).or_default() += 1;
                    rollup.exit_status = Some(verdict);
                    if verdict == Verdict::Retry {
                        rollup.retry_count += 1;
                    }
                }
            }
        }

        order
            .into_iter()
            .map(|node_id| {
                let mut rollup = by_node.remove(node_id.as_str()).expect("ordered node");
                let counters = AttentionCounters {
                    retry_count: rollup.retry_count,
                    escalate_count: rollup
                        .verdict_counts
                        .get(&Verdict::Escalate)
                        .copied()
                        .unwrap_or(0),
                    duration_ms: 0,
                    tokens: rollup.tokens,
                    total_steps: rollup.steps,
                };
                rollup.attention_reasons = counters.categories();
                rollup
            })
            .collect()
    }

    /// Discard every record of the run stamped after `cutoff`. Used by
    /// recovery: events after the checkpoint's timestamp must be absent.
    pub fn truncate_after(&self, run_id: &str, cutoff: DateTime<Utc>) {
        let Some(run_log) = self.existing_run_log(run_id) else {
            return;
        };
        let mut log = run_log.lock();
        log.steps.retain(|s| s.ts <= cutoff);
        log.last_ts = log.steps.last().map(|s| s.ts);
        log.next_step_no = log.steps.last().map(|s| s.step_no).unwrap_or(0);
    }

    /// Ids of all runs the log has seen.
    #[must_use]
    pub fn run_ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.inner.runs.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verdict_draft(run: &str, node: &str, verdict: Verdict) -> StepDraft {
        StepDraft::new(
            run,
            node,
            StepKind::JudgeVerdict,
            json!({"verdict": verdict}),
        )
    }

    #[test]
    fn step_numbers_are_dense_and_ordered() {
        let log = EventLog::new();
        for _ in 0..5 {
            log.append(StepDraft::new("r1", "n1", StepKind::LlmCall, json!({})));
        }
        let steps = log.steps("r1", None);
        let nos: Vec<u64> = steps.iter().map(|s| s.step_no).collect();
        assert_eq!(nos, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn rollups_count_verdicts_per_node() {
        let log = EventLog::new();
        log.append(verdict_draft("r1", "intake", Verdict::Retry));
        log.append(verdict_draft("r1", "intake", Verdict::Retry));
        log.append(verdict_draft("r1", "intake", Verdict::Accept));
        log.append(verdict_draft("r1", "review", Verdict::Accept));

        let rollups = log.node_rollups("r1");
        assert_eq!(rollups.len(), 2);
        let intake = &rollups[0];
        assert_eq!(intake.node_id, "intake");
        assert_eq!(intake.retry_count, 2);
        assert_eq!(intake.exit_status, Some(Verdict::Accept));
        assert_eq!(intake.verdict_counts[&Verdict::Retry], 2);
    }

    #[test]
    fn summary_flags_high_retries() {
        let log = EventLog::new();
        for _ in 0..4 {
            log.append(verdict_draft("r1", "n", Verdict::Retry));
        }
        let summary = log.run_summary("r1").unwrap();
        assert!(summary.needs_attention);
        assert!(
            summary
                .attention_categories
                .contains(&AttentionCategory::HighRetries)
        );
    }

    #[test]
    fn truncate_after_discards_later_steps() {
        let log = EventLog::new();
        log.append(StepDraft::new("r1", "n", StepKind::LlmCall, json!({})));
        let cutoff = log.steps("r1", None)[0].ts;
        log.append(StepDraft::new("r1", "n", StepKind::ToolCall, json!({})));

        log.truncate_after("r1", cutoff);
        let steps = log.steps("r1", None);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, StepKind::LlmCall);

        // Step numbering continues from the truncation point.
        log.append(StepDraft::new("r1", "n", StepKind::LlmCall, json!({})));
        assert_eq!(log.steps("r1", None)[1].step_no, 2);
    }

    #[test]
    fn status_shows_in_summary() {
        let log = EventLog::new();
        log.append(StepDraft::new("r1", "n", StepKind::LlmCall, json!({})));
        log.set_run_status("r1", SessionStatus::Paused);
        assert_eq!(
            log.run_summary("r1").unwrap().status,
            Some(SessionStatus::Paused)
        );
    }
}
