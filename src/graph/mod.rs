//! Graph model: node specs, edges, parallel groups, and validation.
//!
//! A [`Graph`] is loaded once per run and never mutated. Cycles are
//! intentional (retry edges loop back to their source) and are bounded by
//! per-node visit counts, never by runtime topology changes.
//!
//! Build graphs through [`GraphBuilder`]; `build()` performs the full
//! structural validation described in the module docs of
//! [`builder`](crate::graph::builder).

pub mod builder;
pub mod edges;

pub use builder::GraphBuilder;
pub use edges::{Edge, EdgeCondition};

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::error::CoreError;
use crate::memory::Memory;
use crate::tools::ToolDispatcher;
use crate::types::{NodeId, NodeKind, Verdict};

/// Declaration of a single node.
///
/// `input_keys` and `output_keys` are the node's declared memory contract;
/// `nullable_output_keys` (a subset of `output_keys`) may be absent after
/// the node completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub input_keys: Vec<String>,
    #[serde(default)]
    pub output_keys: Vec<String>,
    #[serde(default)]
    pub nullable_output_keys: Vec<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_max_visits")]
    pub max_visits: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps_per_visit: u32,
}

fn default_max_visits() -> u32 {
    1
}

fn default_max_steps() -> u32 {
    8
}

impl NodeSpec {
    /// Create a spec with conservative defaults (1 visit, 8 steps).
    #[must_use]
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            input_keys: Vec::new(),
            output_keys: Vec::new(),
            nullable_output_keys: Vec::new(),
            system_prompt: String::new(),
            tools: Vec::new(),
            max_visits: 1,
            max_steps_per_visit: 8,
        }
    }

    #[must_use]
    pub fn event_loop(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::EventLoop)
    }

    #[must_use]
    pub fn function(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Function)
    }

    #[must_use]
    pub fn client_facing(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::ClientFacingEventLoop)
    }

    #[must_use]
    pub fn terminal(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Terminal)
    }

    #[must_use]
    pub fn with_input_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_output_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_nullable_output_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nullable_output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_max_visits(mut self, max_visits: u32) -> Self {
        self.max_visits = max_visits;
        self
    }

    #[must_use]
    pub fn with_max_steps_per_visit(mut self, max_steps: u32) -> Self {
        self.max_steps_per_visit = max_steps;
        self
    }

    /// Output keys that must be present after the node completes.
    #[must_use]
    pub fn required_output_keys(&self) -> Vec<&String> {
        self.output_keys
            .iter()
            .filter(|k| !self.nullable_output_keys.contains(*k))
            .collect()
    }
}

/// A pure mapping node: declared inputs in, declared outputs out.
///
/// Implementations must be deterministic over their inputs; they see
/// nothing but the declared input keys.
#[async_trait]
pub trait FunctionNode: Send + Sync {
    async fn apply(
        &self,
        inputs: FxHashMap<String, Value>,
    ) -> Result<FxHashMap<String, Value>, FunctionNodeError>;
}

/// Failure from a function node; handled at the node tier (escalate path).
#[derive(Debug, Error)]
#[error("function node failed: {message}")]
pub struct FunctionNodeError {
    pub message: String,
}

impl FunctionNodeError {
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A declared parallel fan-out from one source node.
///
/// When every branch-entry edge matches after `source` completes, the
/// branches run concurrently on memory forks and merge at `join`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub source: NodeId,
    pub branches: Vec<NodeId>,
    pub join: NodeId,
}

/// Declarative graph input: the serde-loadable document form.
///
/// Function-node callables cannot travel in a document; register them on
/// the builder returned by [`into_builder`](Self::into_builder) before
/// calling `build()`.
///
/// ```
/// use agentloom::graph::GraphDocument;
///
/// let doc: GraphDocument = serde_json::from_str(r#"{
///     "nodes": [
///         {"id": "intake", "kind": "event_loop", "output_keys": ["summary"]},
///         {"id": "done", "kind": "terminal"}
///     ],
///     "edges": [
///         {"source": "intake", "target": "done",
///          "condition": "on_verdict", "verdict": "ACCEPT"}
///     ],
///     "entry_node_id": "intake"
/// }"#).unwrap();
/// let graph = doc.into_builder().build().unwrap();
/// assert_eq!(graph.entry_node_id(), "intake");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub entry_node_id: NodeId,
    #[serde(default)]
    pub parallel_groups: Vec<ParallelGroup>,
}

impl GraphDocument {
    /// Lower the document into a builder (attach function callables, then
    /// `build()` to validate).
    #[must_use]
    pub fn into_builder(self) -> GraphBuilder {
        let mut builder = GraphBuilder::new();
        for node in self.nodes {
            builder = builder.add_node(node);
        }
        for edge in self.edges {
            builder = builder.add_edge(edge.source, edge.target, edge.condition);
        }
        for group in self.parallel_groups {
            builder = builder.add_parallel_group(group.source, group.branches, group.join);
        }
        builder.entry(self.entry_node_id)
    }
}

/// Structural validation failures raised by [`GraphBuilder::build`].
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph has no nodes")]
    #[diagnostic(code(agentloom::graph::empty))]
    Empty,

    #[error("duplicate node id: {id}")]
    #[diagnostic(code(agentloom::graph::duplicate_node))]
    DuplicateNode { id: NodeId },

    #[error("no entry node declared")]
    #[diagnostic(code(agentloom::graph::no_entry))]
    NoEntry,

    #[error("entry node {id} is not declared")]
    #[diagnostic(code(agentloom::graph::entry_missing))]
    EntryMissing { id: NodeId },

    #[error("edge references undeclared node {id} ({end} of {from_node} -> {target})")]
    #[diagnostic(code(agentloom::graph::edge_endpoint))]
    EdgeEndpointMissing {
        id: NodeId,
        end: &'static str,
        from_node: NodeId,
        target: NodeId,
    },

    #[error("node {id} is unreachable from the entry node")]
    #[diagnostic(
        code(agentloom::graph::unreachable),
        help("Every node must be reachable; remove {id} or wire an edge to it.")
    )]
    Unreachable { id: NodeId },

    #[error("node {id}: nullable_output_keys must be a subset of output_keys ({key})")]
    #[diagnostic(code(agentloom::graph::nullable_not_subset))]
    NullableNotSubset { id: NodeId, key: String },

    #[error("terminal node {id} has outgoing edges")]
    #[diagnostic(code(agentloom::graph::terminal_outgoing))]
    TerminalHasOutgoing { id: NodeId },

    #[error("function node {id} has no registered callable")]
    #[diagnostic(code(agentloom::graph::function_missing))]
    FunctionMissingCallable { id: NodeId },

    #[error("node {id} declares max_visits = 0")]
    #[diagnostic(code(agentloom::graph::zero_visits))]
    ZeroVisits { id: NodeId },

    #[error("on_verdict(CONTINUE) edge out of non-event-loop node {id}")]
    #[diagnostic(code(agentloom::graph::continue_from_non_event_loop))]
    ContinueFromNonEventLoop { id: NodeId },

    #[error("parallel group at {from_node}: branch entries {a} and {b} share node {node}")]
    #[diagnostic(
        code(agentloom::graph::parallel_overlap),
        help("Branches must not intersect before the declared join node.")
    )]
    ParallelBranchOverlap {
        from_node: NodeId,
        a: NodeId,
        b: NodeId,
        node: NodeId,
    },

    #[error("parallel group at {from_node}: branch {branch} never reaches join {join}")]
    #[diagnostic(code(agentloom::graph::parallel_no_join))]
    ParallelBranchNoJoin {
        from_node: NodeId,
        branch: NodeId,
        join: NodeId,
    },

    #[error("parallel group at {from_node}: branch {branch} contains nested parallel source {nested}")]
    #[diagnostic(code(agentloom::graph::parallel_nested))]
    ParallelNested {
        from_node: NodeId,
        branch: NodeId,
        nested: NodeId,
    },

    #[error("parallel group at {from_node}: branch {branch} contains client-facing node {node}")]
    #[diagnostic(
        code(agentloom::graph::parallel_client_facing),
        help("Client-facing nodes suspend the whole run and cannot live inside a parallel batch.")
    )]
    ParallelClientFacing {
        from_node: NodeId,
        branch: NodeId,
        node: NodeId,
    },

    #[error(
        "parallel group at {from_node}: branch {reader} reads key {key} written by branch {writer}"
    )]
    #[diagnostic(code(agentloom::graph::parallel_key_clash))]
    ParallelKeyClash {
        from_node: NodeId,
        reader: NodeId,
        writer: NodeId,
        key: String,
    },

    #[error("parallel group references undeclared node {id}")]
    #[diagnostic(code(agentloom::graph::parallel_endpoint))]
    ParallelEndpointMissing { id: NodeId },
}

impl From<GraphError> for CoreError {
    fn from(err: GraphError) -> Self {
        CoreError::GraphInvalid {
            reason: err.to_string(),
        }
    }
}

/// A validated, immutable workflow graph.
pub struct Graph {
    pub(crate) nodes: FxHashMap<NodeId, NodeSpec>,
    pub(crate) node_order: Vec<NodeId>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) edges_by_source: FxHashMap<NodeId, Vec<usize>>,
    pub(crate) entry_node_id: NodeId,
    pub(crate) terminal_node_ids: FxHashSet<NodeId>,
    pub(crate) functions: FxHashMap<NodeId, Arc<dyn FunctionNode>>,
    pub(crate) parallel_groups: FxHashMap<NodeId, ParallelGroup>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes)
            .field("node_order", &self.node_order)
            .field("edges", &self.edges)
            .field("edges_by_source", &self.edges_by_source)
            .field("entry_node_id", &self.entry_node_id)
            .field("terminal_node_ids", &self.terminal_node_ids)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("parallel_groups", &self.parallel_groups)
            .finish()
    }
}

impl Graph {
    /// Start building a graph.
    #[must_use]
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn entry_node_id(&self) -> &NodeId {
        &self.entry_node_id
    }

    #[must_use]
    pub fn is_terminal(&self, id: &str) -> bool {
        self.terminal_node_ids.contains(id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node ids in declaration order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.node_order.iter()
    }

    /// Outgoing edges of `source` in declaration order.
    pub fn edges_from(&self, source: &str) -> impl Iterator<Item = &Edge> {
        self.edges_by_source
            .get(source)
            .into_iter()
            .flatten()
            .map(|idx| &self.edges[*idx])
    }

    /// First edge (declaration order) whose condition matches — the edge
    /// that fires. Deterministic for a fixed `(source, verdict, memory)`.
    #[must_use]
    pub fn next_edge(
        &self,
        source: &str,
        last_verdict: Option<Verdict>,
        memory: &Memory,
    ) -> Option<&Edge> {
        self.edges_from(source)
            .find(|e| e.condition.matches(last_verdict, memory))
    }

    #[must_use]
    pub fn function(&self, id: &str) -> Option<Arc<dyn FunctionNode>> {
        self.functions.get(id).cloned()
    }

    #[must_use]
    pub fn parallel_group(&self, source: &str) -> Option<&ParallelGroup> {
        self.parallel_groups.get(source)
    }

    /// Whether the declared parallel group at `source` is eligible now:
    /// every branch-entry edge must match the current verdict and memory.
    #[must_use]
    pub fn parallel_batch_ready(
        &self,
        source: &str,
        last_verdict: Option<Verdict>,
        memory: &Memory,
    ) -> bool {
        let Some(group) = self.parallel_groups.get(source) else {
            return false;
        };
        group.branches.iter().all(|branch| {
            self.edges_from(source)
                .any(|e| e.target == *branch && e.condition.matches(last_verdict, memory))
        })
    }

    /// Run-start check: every tool named by a node must resolve in the
    /// dispatcher. `set_output` is runtime-provided and always resolves.
    pub fn validate_tools(&self, dispatcher: &dyn ToolDispatcher) -> Result<(), CoreError> {
        for id in &self.node_order {
            let node = &self.nodes[id];
            for tool in &node.tools {
                if tool == crate::tools::SET_OUTPUT {
                    continue;
                }
                if !dispatcher.resolves(tool) {
                    return Err(CoreError::ToolUnavailable { tool: tool.clone() });
                }
            }
        }
        Ok(())
    }
}
