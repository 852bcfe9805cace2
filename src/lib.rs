//! # Agentloom: Goal-Adjudicated Agent Runtime
//!
//! Agentloom executes a directed graph of *nodes* that cooperate through
//! shared memory, an LLM, and a toolchain to accomplish a declared *goal*
//! whose success is adjudicated at runtime by a judge. It is the engine
//! behind self-correcting agents that observe intermediate outputs, retry
//! or escalate, and may pause for human input.
//!
//! ## Core Concepts
//!
//! - **Goal**: success criteria and hard/soft constraints, fixed at run start
//! - **Graph**: nodes joined by condition-selected edges; cycles bounded by visit counts
//! - **Event-loop nodes**: interleave LLM steps, tool calls, and judge verdicts
//! - **Memory**: attributed key/value state shared across a run
//! - **Sessions**: durable envelopes with checkpoints for pause/resume/recover
//! - **Credentials**: encrypted multi-key secrets with `{{id.key}}` templating
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use agentloom::config::RuntimeConfig;
//! use agentloom::executor::Executor;
//! use agentloom::goal::Goal;
//! use agentloom::graph::{EdgeCondition, Graph, NodeSpec};
//! use agentloom::judge::CriteriaJudge;
//! use agentloom::session_store::InMemorySessionStore;
//! use agentloom::tools::ToolRegistry;
//! use agentloom::types::Verdict;
//! use serde_json::json;
//!
//! # async fn example(llm: Arc<dyn agentloom::llm::LlmClient>) -> Result<(), agentloom::error::CoreError> {
//! let graph = Graph::builder()
//!     .add_node(
//!         NodeSpec::event_loop("intake")
//!             .with_system_prompt("Summarize the incoming ticket.")
//!             .with_input_keys(["ticket"])
//!             .with_output_keys(["summary"])
//!             .with_max_visits(3),
//!     )
//!     .add_node(NodeSpec::terminal("done"))
//!     .add_edge("intake", "done", EdgeCondition::OnVerdict { verdict: Verdict::Accept })
//!     .entry("intake")
//!     .build()?;
//!
//! let goal = Goal::builder("summarize")
//!     .description("Summarize the ticket")
//!     .criterion("has-summary", "summary", json!(null), 1.0)
//!     .build();
//!
//! let executor = Executor::new(
//!     llm,
//!     Arc::new(ToolRegistry::new()),
//!     Arc::new(CriteriaJudge::new()),
//!     Arc::new(InMemorySessionStore::new()),
//!     RuntimeConfig::default(),
//! );
//!
//! let result = executor
//!     .execute(&graph, &goal, "summarizer", json!({"ticket": "printer on fire"}))
//!     .await?;
//! println!("terminated by {:?}", result.terminated_by);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`goal`] - Goals, success criteria, constraints
//! - [`graph`] - Graph model, builder, edge conditions, parallel groups
//! - [`memory`] - Attributed shared memory and branch merges
//! - [`llm`] / [`tools`] - Adapter contracts for the LLM and tool dispatcher
//! - [`judge`] - Verdict adjudication
//! - [`event_loop`] - The per-node inner loop and its suspension states
//! - [`executor`] - Scheduling, visit limits, parallel batches, pause/resume
//! - [`session`] / [`session_store`] - Durable sessions and checkpoints
//! - [`events`] - Append-only event log, roll-up queries, observer bus
//! - [`credentials`] - Encrypted credential store and templating
//! - [`config`] / [`telemetry`] - Runtime knobs and tracing bootstrap

pub mod config;
pub mod credentials;
pub mod error;
pub mod event_loop;
pub mod events;
pub mod executor;
pub mod goal;
pub mod graph;
pub mod judge;
pub mod llm;
pub mod memory;
pub mod persistence;
pub mod session;
pub mod session_store;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod utils;
