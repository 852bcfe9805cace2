#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

use agentloom::goal::Goal;
use agentloom::graph::NodeSpec;
use agentloom::judge::{Evaluation, Judge};
use agentloom::memory::Memory;

/// Deterministic judge with an optional per-node verdict script.
///
/// Each evaluation of a node pops the next scripted evaluation for that
/// node; nodes without a script (or with an exhausted one) get ACCEPT.
/// Scripts can be swapped between runs, which the recovery tests use to
/// steer re-execution down a different edge.
#[derive(Default)]
pub struct ScriptedJudge {
    scripts: Mutex<FxHashMap<String, VecDeque<Evaluation>>>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepting() -> Self {
        Self::default()
    }

    /// Replace the verdict script for one node.
    pub fn set_script(&self, node_id: &str, evaluations: Vec<Evaluation>) {
        self.scripts
            .lock()
            .insert(node_id.to_string(), evaluations.into());
    }

    pub fn with_script(self, node_id: &str, evaluations: Vec<Evaluation>) -> Self {
        self.set_script(node_id, evaluations);
        self
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn evaluate(&self, node: &NodeSpec, _memory: &Memory, _goal: &Goal) -> Evaluation {
        self.scripts
            .lock()
            .get_mut(&node.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(Evaluation::accept)
    }
}
