use agentloom::graph::{EdgeCondition, Graph, NodeSpec};
use agentloom::memory::Memory;
use agentloom::types::Verdict;
use proptest::prelude::*;
use serde_json::json;

fn routing_graph() -> Graph {
    Graph::builder()
        .add_node(
            NodeSpec::event_loop("router")
                .with_output_keys(["route", "flag"])
                .with_max_visits(5),
        )
        .add_node(NodeSpec::event_loop("fast"))
        .add_node(NodeSpec::event_loop("slow"))
        .add_node(NodeSpec::event_loop("escalations"))
        .add_node(NodeSpec::terminal("done"))
        .add_edge(
            "router",
            "escalations",
            EdgeCondition::OnVerdict {
                verdict: Verdict::Escalate,
            },
        )
        .add_edge(
            "router",
            "fast",
            EdgeCondition::OnOutputEquals {
                key: "route".into(),
                value: json!("fast"),
            },
        )
        .add_edge(
            "router",
            "slow",
            EdgeCondition::OnOutputPresent { key: "flag".into() },
        )
        .add_edge("router", "done", EdgeCondition::Always)
        .add_edge("fast", "done", EdgeCondition::Always)
        .add_edge("slow", "done", EdgeCondition::Always)
        .add_edge("escalations", "done", EdgeCondition::Always)
        .entry("router")
        .build()
        .unwrap()
}

fn verdict_strategy() -> impl Strategy<Value = Option<Verdict>> {
    prop_oneof![
        Just(None),
        Just(Some(Verdict::Accept)),
        Just(Some(Verdict::Retry)),
        Just(Some(Verdict::Escalate)),
        Just(Some(Verdict::Continue)),
    ]
}

fn memory_strategy() -> impl Strategy<Value = Memory> {
    (any::<bool>(), any::<bool>(), "[a-z]{1,6}").prop_map(|(fast, flag, noise)| {
        let mut memory = Memory::new();
        if fast {
            memory.write("route".into(), json!("fast"), "router", 1);
        }
        if flag {
            memory.write("flag".into(), json!(true), "router", 1);
        }
        memory.write("noise".into(), json!(noise), "router", 1);
        memory
    })
}

proptest! {
    /// For fixed (source, verdict, memory) the selected edge never varies.
    #[test]
    fn edge_selection_is_deterministic(
        verdict in verdict_strategy(),
        memory in memory_strategy(),
    ) {
        let graph = routing_graph();
        let first = graph.next_edge("router", verdict, &memory).cloned();
        for _ in 0..10 {
            let again = graph.next_edge("router", verdict, &memory).cloned();
            prop_assert_eq!(first.clone(), again);
        }
    }

    /// Declaration order breaks ties: the escalate edge outranks the
    /// output-driven edges, which outrank the catch-all.
    #[test]
    fn declaration_order_breaks_ties(
        verdict in verdict_strategy(),
        memory in memory_strategy(),
    ) {
        let graph = routing_graph();
        let edge = graph.next_edge("router", verdict, &memory).expect("Always edge matches");
        if verdict == Some(Verdict::Escalate) {
            prop_assert_eq!(edge.target.as_str(), "escalations");
        } else if memory.get("route") == Some(&json!("fast")) {
            prop_assert_eq!(edge.target.as_str(), "fast");
        } else if memory.contains_key("flag") {
            prop_assert_eq!(edge.target.as_str(), "slow");
        } else {
            prop_assert_eq!(edge.target.as_str(), "done");
        }
    }
}

#[test]
fn selection_ignores_unrelated_memory_noise() {
    let graph = routing_graph();
    let mut memory = Memory::new();
    memory.write("route".into(), json!("fast"), "router", 1);
    let with_noise = {
        let mut m = memory.clone();
        m.write("extra".into(), json!([1, 2, 3]), "router", 2);
        m
    };
    assert_eq!(
        graph.next_edge("router", None, &memory).map(|e| &e.target),
        graph
            .next_edge("router", None, &with_noise)
            .map(|e| &e.target)
    );
}
