use std::sync::Arc;
use std::time::Duration;

use agentloom::error::CoreError;
use agentloom::events::StepKind;
use agentloom::graph::{EdgeCondition, Graph, NodeSpec};
use agentloom::judge::{CriteriaJudge, Evaluation};
use agentloom::session::CheckpointKind;
use agentloom::session_store::{InMemorySessionStore, SessionStore};
use agentloom::tools::ToolRegistry;
use agentloom::types::{SessionStatus, Termination, Verdict};
use serde_json::json;

mod common;
use common::*;

/// Four-step intake script: three rejected drafts, then an accepted one.
fn slow_intake_script() -> Vec<agentloom::llm::Completion> {
    vec![
        text_step("draft one"),
        text_step("draft two"),
        text_step("draft three"),
        set_output_step(json!({"summary": "final"})),
    ]
}

async fn wait_for_llm_calls(executor: &agentloom::executor::Executor, run_id: &str, n: usize) {
    for _ in 0..500 {
        let steps = executor.event_log().steps(run_id, None);
        if count_kind(&steps, StepKind::LlmCall) >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("run {run_id} never reached {n} llm calls");
}

async fn wait_for_run_id(executor: &agentloom::executor::Executor) -> String {
    for _ in 0..500 {
        let ids = executor.event_log().run_ids();
        if let Some(id) = ids.first() {
            return id.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no run appeared in the event log");
}

#[tokio::test]
async fn pause_checkpoints_and_resume_matches_uninterrupted_trace() {
    let store = Arc::new(InMemorySessionStore::new());
    let llm = Arc::new(
        ScriptedLlm::new(slow_intake_script()).with_delay(Duration::from_millis(30)),
    );
    let executor = Arc::new(executor_full(
        llm,
        Arc::new(ToolRegistry::new()),
        Arc::new(CriteriaJudge::new()),
        store.clone(),
        quiet_config(),
    ));

    let graph = Arc::new(intake_graph());
    let goal = Arc::new(summary_goal());
    let task = {
        let executor = Arc::clone(&executor);
        let graph = Arc::clone(&graph);
        let goal = Arc::clone(&goal);
        tokio::spawn(async move {
            executor
                .execute(&graph, &goal, "s", json!({"ticket": "t"}))
                .await
        })
    };

    let run_id = wait_for_run_id(&executor).await;
    wait_for_llm_calls(&executor, &run_id, 2).await;
    executor.pause(&run_id).unwrap();

    let paused = task.await.unwrap().unwrap();
    assert_eq!(paused.terminated_by, Termination::PauseRequested);
    assert_eq!(paused.status, SessionStatus::Paused);

    let session = store.load_session(&run_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert!(
        session
            .checkpoints
            .iter()
            .any(|cp| cp.kind == CheckpointKind::Pause),
        "a pause checkpoint was written"
    );

    let resumed = executor.resume(&graph, &goal, &run_id).await.unwrap();
    assert_eq!(resumed.terminated_by, Termination::TerminalNode);
    assert_eq!(resumed.memory.get("summary"), Some(&json!("final")));
    assert_eq!(resumed.state.visit_count("intake"), 1);

    // The paused-and-resumed trace equals an uninterrupted control run.
    let control = executor_with(
        Arc::new(ScriptedLlm::new(slow_intake_script())),
        Arc::new(CriteriaJudge::new()),
    );
    let control_result = control
        .execute(&graph, &goal, "s", json!({"ticket": "t"}))
        .await
        .unwrap();

    let interrupted_trace = step_kinds(&executor.event_log().steps(&run_id, None));
    let control_trace =
        step_kinds(&control.event_log().steps(&control_result.session_id, None));
    assert_eq!(interrupted_trace, control_trace);
}

#[tokio::test]
async fn cancel_is_terminal() {
    let store = Arc::new(InMemorySessionStore::new());
    let llm = Arc::new(
        ScriptedLlm::new(slow_intake_script()).with_delay(Duration::from_millis(30)),
    );
    let executor = Arc::new(executor_full(
        llm,
        Arc::new(ToolRegistry::new()),
        Arc::new(CriteriaJudge::new()),
        store.clone(),
        quiet_config(),
    ));

    let graph = Arc::new(intake_graph());
    let goal = Arc::new(summary_goal());
    let task = {
        let executor = Arc::clone(&executor);
        let graph = Arc::clone(&graph);
        let goal = Arc::clone(&goal);
        tokio::spawn(async move {
            executor
                .execute(&graph, &goal, "s", json!({"ticket": "t"}))
                .await
        })
    };

    let run_id = wait_for_run_id(&executor).await;
    wait_for_llm_calls(&executor, &run_id, 1).await;
    executor.cancel(&run_id).unwrap();

    let cancelled = task.await.unwrap().unwrap();
    assert_eq!(cancelled.terminated_by, Termination::Cancelled);
    assert_eq!(cancelled.status, SessionStatus::Cancelled);

    let err = executor.resume(&graph, &goal, &run_id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::SessionNotResumable {
            status: SessionStatus::Cancelled,
            ..
        }
    ));
}

fn review_graph() -> Graph {
    Graph::builder()
        .add_node(
            NodeSpec::event_loop("intake")
                .with_output_keys(["summary"])
                .with_max_visits(3),
        )
        .add_node(
            NodeSpec::event_loop("review")
                .with_input_keys(["summary"])
                .with_output_keys(["approved"]),
        )
        .add_node(
            NodeSpec::event_loop("fallback")
                .with_output_keys(["note"]),
        )
        .add_node(NodeSpec::terminal("done"))
        .add_edge(
            "intake",
            "review",
            EdgeCondition::OnVerdict {
                verdict: Verdict::Accept,
            },
        )
        .add_edge(
            "intake",
            "fallback",
            EdgeCondition::OnVerdict {
                verdict: Verdict::Escalate,
            },
        )
        .add_edge("review", "done", EdgeCondition::OnSuccess)
        .add_edge("fallback", "done", EdgeCondition::OnSuccess)
        .entry("intake")
        .build()
        .unwrap()
}

#[tokio::test]
async fn recover_rewinds_and_follows_the_new_verdict() {
    let store = Arc::new(InMemorySessionStore::new());
    let llm = Arc::new(ScriptedLlm::new(vec![
        set_output_step(json!({"summary": "first pass"})),
        set_output_step(json!({"approved": true})),
    ]));
    let judge = Arc::new(ScriptedJudge::accepting());
    let executor = executor_full(
        llm.clone(),
        Arc::new(ToolRegistry::new()),
        judge.clone(),
        store.clone(),
        quiet_config(),
    );

    let graph = review_graph();
    let goal = summary_goal();
    let first = executor
        .execute(&graph, &goal, "s", json!({}))
        .await
        .unwrap();
    assert_eq!(first.terminated_by, Termination::TerminalNode);
    assert!(first.state.completed_nodes.contains("review"));

    let run_id = first.session_id.clone();
    assert!(
        !executor
            .event_log()
            .steps(&run_id, Some("review"))
            .is_empty()
    );

    let session = store.load_session(&run_id).await.unwrap().unwrap();
    let intake_complete = session
        .checkpoints
        .iter()
        .find(|cp| {
            cp.kind == CheckpointKind::NodeComplete
                && cp.state.last_node_id.as_deref() == Some("intake")
        })
        .expect("intake has a node_complete checkpoint")
        .id
        .clone();

    // Steer the re-executed intake down the escalate edge this time.
    judge.set_script("intake", vec![Evaluation::escalate("changed my mind")]);
    llm.push_steps(vec![
        text_step("reconsidering"),
        set_output_step(json!({"note": "handled by fallback"})),
    ]);

    let recovered = executor
        .recover(&graph, &goal, &run_id, &intake_complete)
        .await
        .unwrap();

    assert_eq!(recovered.terminated_by, Termination::TerminalNode);
    assert!(recovered.state.completed_nodes.contains("fallback"));
    assert_eq!(
        recovered.memory.get("note"),
        Some(&json!("handled by fallback"))
    );
    // Events after the checkpoint's timestamp were discarded: the first
    // run's review steps are gone and review never re-ran.
    assert!(
        executor
            .event_log()
            .steps(&run_id, Some("review"))
            .is_empty()
    );
}

#[tokio::test]
async fn resume_unknown_session_fails() {
    let executor = executor_with(
        Arc::new(ScriptedLlm::new(vec![])),
        Arc::new(ScriptedJudge::accepting()),
    );
    let err = executor
        .resume(&intake_graph(), &summary_goal(), "sess-0000000000000-nope")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::SessionNotFound { .. }));
}
