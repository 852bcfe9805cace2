#![allow(dead_code)]

use std::sync::Arc;

use agentloom::config::{HubConfig, RuntimeConfig};
use agentloom::events::{StepKind, StepRecord};
use agentloom::executor::Executor;
use agentloom::goal::Goal;
use agentloom::graph::{EdgeCondition, Graph, NodeSpec};
use agentloom::judge::Judge;
use agentloom::llm::LlmClient;
use agentloom::session_store::{InMemorySessionStore, SessionStore};
use agentloom::tools::ToolDispatcher;
use agentloom::tools::ToolRegistry;
use agentloom::types::Verdict;
use serde_json::json;

/// Config for tests: no stdout noise, tight timeouts.
pub fn quiet_config() -> RuntimeConfig {
    RuntimeConfig::default()
        .with_hub(HubConfig::silent())
        .with_step_timeout(std::time::Duration::from_secs(10))
        .with_quiescence(std::time::Duration::from_secs(5))
}

/// Executor over scripted collaborators and an in-memory session store.
pub fn executor_with(llm: Arc<dyn LlmClient>, judge: Arc<dyn Judge>) -> Executor {
    Executor::new(
        llm,
        Arc::new(ToolRegistry::new()),
        judge,
        Arc::new(InMemorySessionStore::new()),
        quiet_config(),
    )
}

/// Executor with explicit tools and store.
pub fn executor_full(
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolDispatcher>,
    judge: Arc<dyn Judge>,
    store: Arc<dyn SessionStore>,
    config: RuntimeConfig,
) -> Executor {
    Executor::new(llm, tools, judge, store, config)
}

/// `intake -> done` with an ACCEPT edge and a self-looping RETRY edge.
pub fn intake_graph() -> Graph {
    Graph::builder()
        .add_node(
            NodeSpec::event_loop("intake")
                .with_system_prompt("Summarize the incoming request.")
                .with_input_keys(["ticket"])
                .with_output_keys(["summary"])
                .with_max_visits(3)
                .with_max_steps_per_visit(10),
        )
        .add_node(NodeSpec::terminal("done"))
        .add_edge(
            "intake",
            "done",
            EdgeCondition::OnVerdict {
                verdict: Verdict::Accept,
            },
        )
        .entry("intake")
        .build()
        .expect("intake graph is valid")
}

/// Goal requiring a non-empty `summary`.
pub fn summary_goal() -> Goal {
    Goal::builder("summarize")
        .description("Produce a summary of the request")
        .criterion("has-summary", "summary", json!(null), 1.0)
        .build()
}

/// Step kinds of a run's trace, in order.
pub fn step_kinds(steps: &[StepRecord]) -> Vec<StepKind> {
    steps.iter().map(|s| s.kind).collect()
}

/// Count steps of one kind.
pub fn count_kind(steps: &[StepRecord], kind: StepKind) -> usize {
    steps.iter().filter(|s| s.kind == kind).count()
}
