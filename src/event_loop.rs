//! The per-node inner loop for event-loop nodes.
//!
//! One *visit* of an event-loop node interleaves LLM completions, tool
//! dispatch, and judge verdicts until the judge accepts, the node
//! escalates, or the visit suspends waiting for user input. The loop is an
//! explicit state machine over [`VisitState`] rather than a coroutine:
//! suspension returns the partial state to the executor, which persists it
//! into the session and re-enters the loop on resume.
//!
//! Failure tiers honored here:
//! - tool-call and LLM-call failures are recorded, fed back into message
//!   history, and left to the model to route around (step-local);
//! - step-budget exhaustion, client-facing ordering violations, and
//!   output-schema mismatches produce ESCALATE or guard feedback
//!   (node-local);
//! - nothing in this module aborts the run.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::RuntimeConfig;
use crate::events::{EventLog, StepDraft, StepKind};
use crate::executor::control::RunControl;
use crate::goal::{ConstraintKind, Goal};
use crate::graph::NodeSpec;
use crate::judge::{Evaluation, Judge};
use crate::llm::{ChatMessage, Completion, LlmClient};
use crate::memory::Memory;
use crate::tools::{
    SET_OUTPUT, ToolDispatcher, ToolFailure, ToolFailureKind, ToolSchema, set_output_schema,
    tool_result_payload,
};
use crate::types::NodeKind;

/// Serializable loop state of one in-flight visit.
///
/// Persisted into the session on suspension so a resumed run re-enters the
/// loop exactly where it left off.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitState {
    pub messages: Vec<ChatMessage>,
    pub step_in_visit: u32,
    /// A `user_input_request` was emitted and not yet answered.
    pub awaiting_user_input: bool,
    /// A `user_input_received` landed this visit.
    pub user_input_received: bool,
    /// `set_output` wrote at least once this visit.
    pub set_output_done: bool,
    /// Retry feedback accumulated across judge iterations.
    pub feedback: Vec<String>,
    /// Step at which the last periodic checkpoint was taken.
    #[serde(default)]
    pub last_periodic_at: u32,
}

/// How a visit ended (or didn't).
#[derive(Debug)]
pub enum VisitOutcome {
    /// The judge (or a node-local limit) decided.
    Verdict(Evaluation),
    /// Waiting on user input; the state is persisted and the run pauses.
    Suspended(VisitState),
    /// A periodic checkpoint is due; the executor persists and re-enters.
    CheckpointDue(VisitState),
    /// Pause or cancel observed at an inter-step boundary.
    Interrupted { state: VisitState, cancelled: bool },
}

enum CallOutcome<T> {
    Done(T),
    TimedOut,
    Interrupted { cancelled: bool },
}

/// Runs visits of a single node. Borrowed collaborators are shared with
/// the executor; the runtime itself is stateless between visits.
pub(crate) struct EventLoopRuntime<'a> {
    pub node: &'a NodeSpec,
    pub goal: &'a Goal,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<dyn ToolDispatcher>,
    pub judge: Arc<dyn Judge>,
    pub log: EventLog,
    pub config: &'a RuntimeConfig,
    pub control: RunControl,
}

impl<'a> EventLoopRuntime<'a> {
    /// Run (or resume) one visit.
    ///
    /// `resume` re-enters a suspended or checkpointed visit; `user_input`
    /// answers a pending `user_input_request`.
    pub async fn run_visit(
        &self,
        run_id: &str,
        memory: &mut Memory,
        resume: Option<VisitState>,
        user_input: Option<String>,
    ) -> VisitOutcome {
        let mut state = match resume {
            Some(state) => state,
            None => {
                let mut state = VisitState::default();
                state
                    .messages
                    .push(ChatMessage::system(self.compose_system_prompt(memory, &[])));
                state
                    .messages
                    .push(ChatMessage::user(self.render_inputs(memory)));
                state
            }
        };

        if state.awaiting_user_input {
            if let Some(input) = user_input {
                self.append(run_id, StepKind::UserInputReceived, json!({"text": &input}), 0, 0);
                state.messages.push(ChatMessage::user(input));
                state.awaiting_user_input = false;
                state.user_input_received = true;
            } else {
                // Re-entered without an answer; stay suspended.
                return VisitOutcome::Suspended(state);
            }
        }

        let visit_budget =
            self.config.step_timeout * self.node.max_steps_per_visit.max(1);
        let deadline = tokio::time::Instant::now() + visit_budget;
        let tool_schemas = self.tool_schemas();

        loop {
            // Inter-step boundary: the only legal suspension points.
            if self.control.cancel_requested() {
                return VisitOutcome::Interrupted {
                    state,
                    cancelled: true,
                };
            }
            if self.control.pause_requested() {
                return VisitOutcome::Interrupted {
                    state,
                    cancelled: false,
                };
            }
            if let Some(every) = self.config.periodic_checkpoint_every {
                if state.step_in_visit > 0
                    && state.step_in_visit % every == 0
                    && state.last_periodic_at != state.step_in_visit
                {
                    state.last_periodic_at = state.step_in_visit;
                    return VisitOutcome::CheckpointDue(state);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return VisitOutcome::Verdict(Evaluation::escalate(format!(
                    "visit deadline of {}s exceeded",
                    visit_budget.as_secs()
                )));
            }

            state.step_in_visit += 1;
            if state.step_in_visit > self.node.max_steps_per_visit {
                return VisitOutcome::Verdict(Evaluation::escalate(format!(
                    "step budget exhausted ({} steps)",
                    self.node.max_steps_per_visit
                )));
            }

            let completion = match self
                .guarded(self.llm.complete(&state.messages, &tool_schemas))
                .await
            {
                CallOutcome::Done(Ok(completion)) => completion,
                CallOutcome::Done(Err(err)) => {
                    self.append(
                        run_id,
                        StepKind::LlmCall,
                        json!({"error": err.to_string(), "retriable": err.retriable()}),
                        0,
                        0,
                    );
                    continue;
                }
                CallOutcome::TimedOut => {
                    self.append(
                        run_id,
                        StepKind::LlmCall,
                        json!({"error": "timeout", "retriable": true}),
                        0,
                        self.config.step_timeout.as_millis() as u64,
                    );
                    continue;
                }
                CallOutcome::Interrupted { cancelled } => {
                    state.step_in_visit -= 1;
                    return VisitOutcome::Interrupted { state, cancelled };
                }
            };

            self.log_llm_call(run_id, &completion);
            if !completion.text.is_empty() {
                state.messages.push(ChatMessage::assistant(&completion.text));
            }

            if !completion.tool_calls.is_empty() {
                let mut dispatched_external = false;
                let mut guard_failed = false;
                for call in &completion.tool_calls {
                    if call.name == SET_OUTPUT {
                        if !self.handle_set_output(run_id, memory, &mut state, &call.arguments) {
                            guard_failed = true;
                        }
                    } else {
                        self.dispatch_tool(run_id, &mut state, &call.name, &call.arguments)
                            .await;
                        dispatched_external = true;
                    }
                }
                // External results (or guard feedback) go back to the model
                // before any verdict.
                if dispatched_external || guard_failed {
                    continue;
                }
            }

            if self.node.kind == NodeKind::ClientFacingEventLoop && !state.user_input_received {
                if !state.awaiting_user_input {
                    self.append(
                        run_id,
                        StepKind::UserInputRequest,
                        json!({"prompt": completion.text}),
                        0,
                        0,
                    );
                    state.awaiting_user_input = true;
                }
                return VisitOutcome::Suspended(state);
            }

            if state.set_output_done {
                if let Some(missing) = self.missing_required_keys(memory) {
                    let feedback = format!(
                        "set_output is missing required keys: {}",
                        missing.join(", ")
                    );
                    state.messages.push(ChatMessage::tool(
                        tool_result_payload(&Err(ToolFailure::invalid_arguments(&feedback)))
                            .to_string(),
                    ));
                    continue;
                }
            }

            let evaluation = self.judge.evaluate(self.node, memory, self.goal).await;
            self.append(
                run_id,
                StepKind::JudgeVerdict,
                json!({
                    "verdict": evaluation.verdict,
                    "feedback": evaluation.feedback,
                    "violated_constraints": evaluation.violated_constraints,
                }),
                0,
                0,
            );

            // A judge verdict referencing a violated hard constraint ends
            // the visit no matter which verdict it rode in on; the
            // executor aborts the run on it.
            if self.hard_constraint_violated(&evaluation) {
                return VisitOutcome::Verdict(evaluation);
            }

            match evaluation.verdict {
                crate::types::Verdict::Accept | crate::types::Verdict::Escalate => {
                    return VisitOutcome::Verdict(evaluation);
                }
                crate::types::Verdict::Retry => {
                    if let Some(feedback) = &evaluation.feedback {
                        state.feedback.push(feedback.clone());
                    }
                    // Feedback rides as an addendum to the system prompt.
                    state.messages[0] = ChatMessage::system(
                        self.compose_system_prompt(memory, &state.feedback),
                    );
                }
                crate::types::Verdict::Continue => {}
            }
        }
    }

    /// Handle the privileged `set_output` tool. Returns `false` when a
    /// guard rejected the call (feedback is already in the history).
    fn handle_set_output(
        &self,
        run_id: &str,
        memory: &mut Memory,
        state: &mut VisitState,
        arguments: &Value,
    ) -> bool {
        if self.node.kind == NodeKind::ClientFacingEventLoop && !state.user_input_received {
            let failure = ToolFailure::new(
                ToolFailureKind::InvalidArguments,
                "set_output rejected: request and await user input first",
                true,
            );
            self.append(
                run_id,
                StepKind::ToolResult,
                tool_result_payload(&Err(failure.clone())),
                0,
                0,
            );
            state
                .messages
                .push(ChatMessage::tool(tool_result_payload(&Err(failure)).to_string()));
            return false;
        }

        let Some(outputs) = arguments.as_object() else {
            let failure =
                ToolFailure::invalid_arguments("set_output arguments must be an object");
            state
                .messages
                .push(ChatMessage::tool(tool_result_payload(&Err(failure)).to_string()));
            return false;
        };
        if let Some(unknown) = outputs
            .keys()
            .find(|k| !self.node.output_keys.contains(*k))
        {
            let failure = ToolFailure::invalid_arguments(format!(
                "set_output key {unknown:?} is not one of this node's output keys"
            ));
            state
                .messages
                .push(ChatMessage::tool(tool_result_payload(&Err(failure)).to_string()));
            return false;
        }

        let record = self.append(
            run_id,
            StepKind::SetOutput,
            json!({"keys": outputs.keys().collect::<Vec<_>>()}),
            0,
            0,
        );
        let writes = outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        memory.write_outputs(&self.node.id, writes, record);
        state.set_output_done = true;
        state
            .messages
            .push(ChatMessage::tool(tool_result_payload(&Ok(json!({"written": true}))).to_string()));
        true
    }

    async fn dispatch_tool(
        &self,
        run_id: &str,
        state: &mut VisitState,
        name: &str,
        arguments: &Value,
    ) {
        self.append(
            run_id,
            StepKind::ToolCall,
            json!({"name": name, "arguments": arguments}),
            0,
            0,
        );
        let started = tokio::time::Instant::now();
        let result = match self.guarded(self.tools.invoke(name, arguments.clone())).await {
            CallOutcome::Done(result) => result,
            CallOutcome::TimedOut => Err(ToolFailure::timeout(name)),
            // Abandoned mid-flight; the boundary check above will observe
            // the flag on the next iteration.
            CallOutcome::Interrupted { .. } => Err(ToolFailure::new(
                ToolFailureKind::Transport,
                format!("tool {name} abandoned by interrupt"),
                true,
            )),
        };
        let latency = started.elapsed().as_millis() as u64;
        let payload = tool_result_payload(&result);
        self.append(run_id, StepKind::ToolResult, payload.clone(), 0, latency);
        state.messages.push(ChatMessage::tool(payload.to_string()));
    }

    async fn guarded<T>(&self, fut: impl Future<Output = T>) -> CallOutcome<T> {
        tokio::pin!(fut);
        tokio::select! {
            res = timeout(self.config.step_timeout, &mut fut) => match res {
                Ok(value) => CallOutcome::Done(value),
                Err(_) => CallOutcome::TimedOut,
            },
            cancelled = self.control.interrupted() => {
                // The in-flight call gets a bounded quiescence period, then
                // is force-abandoned and treated as failed.
                match timeout(self.config.quiescence, &mut fut).await {
                    Ok(value) => CallOutcome::Done(value),
                    Err(_) => CallOutcome::Interrupted { cancelled },
                }
            }
        }
    }

    fn log_llm_call(&self, run_id: &str, completion: &Completion) {
        let names: Vec<&str> = completion
            .tool_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        self.append_draft(
            StepDraft::new(
                run_id,
                self.node.id.clone(),
                StepKind::LlmCall,
                json!({"text": completion.text, "tool_calls": names}),
            )
            .with_usage(
                completion.usage.total_tokens(),
                completion.usage.latency_ms,
            ),
        );
    }

    fn append(
        &self,
        run_id: &str,
        kind: StepKind,
        payload: Value,
        tokens: u64,
        latency_ms: u64,
    ) -> u64 {
        self.append_draft(
            StepDraft::new(run_id, self.node.id.clone(), kind, payload)
                .with_usage(tokens, latency_ms),
        )
    }

    fn append_draft(&self, draft: StepDraft) -> u64 {
        self.log.append(draft).step_no
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        let advertised = self.tools.list();
        let mut schemas: Vec<ToolSchema> = self
            .node
            .tools
            .iter()
            .filter(|t| *t != SET_OUTPUT)
            .map(|t| {
                advertised
                    .iter()
                    .find(|s| s.name == *t)
                    .cloned()
                    .unwrap_or_else(|| ToolSchema::new(t.clone(), "", json!({"type": "object"})))
            })
            .collect();
        schemas.push(set_output_schema(&self.node.output_keys));
        schemas
    }

    fn hard_constraint_violated(&self, evaluation: &Evaluation) -> bool {
        evaluation.violated_constraints.iter().any(|id| {
            self.goal
                .constraint(id)
                .is_some_and(|c| c.kind == ConstraintKind::Hard)
        })
    }

    fn missing_required_keys(&self, memory: &Memory) -> Option<Vec<String>> {
        let missing: Vec<String> = self
            .node
            .required_output_keys()
            .into_iter()
            .filter(|k| !memory.contains_key(k))
            .cloned()
            .collect();
        if missing.is_empty() { None } else { Some(missing) }
    }

    fn compose_system_prompt(&self, memory: &Memory, feedback: &[String]) -> String {
        let mut prompt = self.node.system_prompt.clone();
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "Write results exclusively through the `set_output` tool. \
             Declared output keys: [{}].",
            self.node.output_keys.join(", ")
        ));
        if !self.node.nullable_output_keys.is_empty() {
            prompt.push_str(&format!(
                " Keys [{}] may be omitted.",
                self.node.nullable_output_keys.join(", ")
            ));
        }
        if self.node.kind == NodeKind::ClientFacingEventLoop {
            prompt.push_str(
                "\nYou must ask the user for input and wait for their reply \
                 before calling set_output.",
            );
        }
        prompt.push_str(
            "\nIf a tool call fails, try an alternative; when alternatives are \
             exhausted, call set_output with partial results.",
        );
        if !memory.is_empty() && !self.node.input_keys.is_empty() {
            prompt.push_str("\nDeclared inputs are provided in the first user message.");
        }
        if !feedback.is_empty() {
            prompt.push_str("\n\nFeedback from previous attempts:");
            for item in feedback {
                prompt.push_str(&format!("\n- {item}"));
            }
        }
        prompt
    }

    fn render_inputs(&self, memory: &Memory) -> String {
        let inputs = memory.collect_keys(&self.node.input_keys);
        if inputs.is_empty() {
            "Begin.".to_string()
        } else {
            json!(inputs).to_string()
        }
    }
}

/// Cancellation-aware wrapper reused by the executor for function nodes.
pub(crate) async fn guarded_call<T>(
    control: &RunControl,
    step_timeout: Duration,
    quiescence: Duration,
    fut: impl Future<Output = T>,
) -> Result<Option<T>, bool> {
    tokio::pin!(fut);
    tokio::select! {
        res = timeout(step_timeout, &mut fut) => match res {
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(None),
        },
        cancelled = control.interrupted() => {
            match timeout(quiescence, &mut fut).await {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(cancelled),
            }
        }
    }
}
