//! Resume across process boundaries: the session survives in the file
//! store and a fresh executor picks the run back up.

use std::sync::Arc;

use agentloom::graph::{EdgeCondition, Graph, NodeSpec};
use agentloom::judge::CriteriaJudge;
use agentloom::session_store::{FileSessionStore, SessionStore};
use agentloom::tools::ToolRegistry;
use agentloom::types::{SessionStatus, Termination, Verdict};
use serde_json::json;

mod common;
use common::*;

fn concierge_graph() -> Graph {
    Graph::builder()
        .add_node(
            NodeSpec::client_facing("concierge")
                .with_output_keys(["summary"])
                .with_max_steps_per_visit(10),
        )
        .add_node(NodeSpec::terminal("done"))
        .add_edge(
            "concierge",
            "done",
            EdgeCondition::OnVerdict {
                verdict: Verdict::Accept,
            },
        )
        .entry("concierge")
        .build()
        .unwrap()
}

#[tokio::test]
async fn suspended_session_resumes_from_a_fresh_store_handle() {
    let dir = tempfile::tempdir().unwrap();
    let graph = concierge_graph();
    let goal = summary_goal();

    // First executor: run until the user-input suspension.
    let session_id = {
        let store = Arc::new(FileSessionStore::open(dir.path()).unwrap());
        let executor = executor_full(
            Arc::new(ScriptedLlm::new(vec![text_step("How can I help?")])),
            Arc::new(ToolRegistry::new()),
            Arc::new(CriteriaJudge::new()),
            store,
            quiet_config(),
        );
        let paused = executor
            .execute(&graph, &goal, "concierge", json!({}))
            .await
            .unwrap();
        assert_eq!(paused.terminated_by, Termination::PauseRequested);
        paused.session_id
    };

    // Second executor over the same directory: the durable state carries
    // the suspended visit.
    let store = Arc::new(FileSessionStore::open(dir.path()).unwrap());
    let executor = executor_full(
        Arc::new(ScriptedLlm::new(vec![set_output_step(
            json!({"summary": "needs an invoice copy"}),
        )])),
        Arc::new(ToolRegistry::new()),
        Arc::new(CriteriaJudge::new()),
        store.clone(),
        quiet_config(),
    );

    let listed = executor
        .event_log()
        .run_ids();
    assert!(listed.is_empty(), "fresh executor has an empty event log");

    executor
        .supply_user_input(&session_id, "send me my invoice")
        .await
        .unwrap();
    let resumed = executor.resume(&graph, &goal, &session_id).await.unwrap();

    assert_eq!(resumed.terminated_by, Termination::TerminalNode);
    assert_eq!(resumed.status, SessionStatus::Completed);
    assert_eq!(
        resumed.memory.get("summary"),
        Some(&json!("needs an invoice copy"))
    );
    assert_eq!(resumed.state.visit_count("concierge"), 1);

    let sessions = store.list_sessions(Some("concierge")).await.unwrap();
    assert_eq!(sessions, vec![session_id]);
}
