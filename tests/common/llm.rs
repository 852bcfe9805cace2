#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agentloom::llm::{ChatMessage, Completion, LlmClient, LlmError, Usage};
use agentloom::tools::ToolSchema;

fn scripted_usage() -> Usage {
    Usage {
        prompt_tokens: 5,
        completion_tokens: 5,
        latency_ms: 1,
    }
}

/// A completion that calls `set_output` with the given key/value pairs.
pub fn set_output_step(outputs: Value) -> Completion {
    let mut completion = Completion::tool_call("set_output", outputs);
    completion.usage = scripted_usage();
    completion
}

/// A plain-text completion with no tool calls.
pub fn text_step(text: &str) -> Completion {
    let mut completion = Completion::text_only(text);
    completion.usage = scripted_usage();
    completion
}

/// A completion invoking an external tool.
pub fn tool_step(name: &str, arguments: Value) -> Completion {
    let mut completion = Completion::tool_call(name, arguments);
    completion.usage = scripted_usage();
    completion
}

/// Deterministic LLM: pops one scripted completion per call.
///
/// An exhausted script returns `LlmError::Unavailable` so a runaway loop
/// fails loudly instead of hanging. `delay` simulates call latency, which
/// the pause/cancel tests rely on to land interrupts between steps.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Completion>>,
    pub calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Append further steps (used by recovery tests re-running nodes).
    pub fn push_steps(&self, steps: Vec<Completion>) {
        self.script.lock().extend(steps);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSchema],
    ) -> Result<Completion, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Unavailable {
                message: "scripted LLM exhausted".into(),
            })
    }
}

/// An LLM that always fails; exercises the step-local error tier.
pub struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSchema],
    ) -> Result<Completion, LlmError> {
        Err(LlmError::Unavailable {
            message: "provider down".into(),
        })
    }
}

/// Convenience: one-step script producing `set_output({"summary": text})`.
pub fn summary_llm(text: &str) -> ScriptedLlm {
    ScriptedLlm::new(vec![set_output_step(json!({"summary": text}))])
}
