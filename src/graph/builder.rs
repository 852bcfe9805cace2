//! Fluent construction and structural validation of workflow graphs.
//!
//! `build()` enforces, in order:
//! - at least one node, unique ids, a declared entry that resolves
//! - every edge endpoint resolves; terminal nodes have no outgoing edges
//! - `nullable_output_keys ⊆ output_keys` and `max_visits ≥ 1` per node
//! - `on_verdict(CONTINUE)` edges only out of event-loop nodes
//! - every node reachable from the entry
//! - declared parallel groups are statically independent: branch subgraphs
//!   are pairwise disjoint before the join, every branch reaches the join,
//!   no nested groups, no client-facing nodes inside a branch, and no
//!   branch reads a key another branch writes
//!
//! Tool-name resolution is deliberately *not* checked here: it depends on
//! the dispatcher and happens at run start via [`Graph::validate_tools`].

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::Arc;

use super::edges::{Edge, EdgeCondition};
use super::{FunctionNode, Graph, GraphError, NodeSpec, ParallelGroup};
use crate::types::{NodeId, NodeKind, Verdict};

/// Builder for [`Graph`].
///
/// # Examples
///
/// ```
/// use agentloom::graph::{Graph, NodeSpec, EdgeCondition};
/// use agentloom::types::Verdict;
///
/// let graph = Graph::builder()
///     .add_node(
///         NodeSpec::event_loop("intake")
///             .with_output_keys(["summary"])
///             .with_max_visits(3),
///     )
///     .add_node(NodeSpec::terminal("done"))
///     .add_edge("intake", "done", EdgeCondition::OnVerdict { verdict: Verdict::Accept })
///     .add_edge("intake", "intake", EdgeCondition::OnVerdict { verdict: Verdict::Retry })
///     .entry("intake")
///     .build()
///     .unwrap();
///
/// assert_eq!(graph.entry_node_id(), "intake");
/// assert!(graph.is_terminal("done"));
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    nodes: FxHashMap<NodeId, NodeSpec>,
    node_order: Vec<NodeId>,
    edges: Vec<Edge>,
    entry: Option<NodeId>,
    functions: FxHashMap<NodeId, Arc<dyn FunctionNode>>,
    parallel_groups: Vec<ParallelGroup>,
    duplicate: Option<NodeId>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node. The first duplicate id is reported at `build()`.
    #[must_use]
    pub fn add_node(mut self, spec: NodeSpec) -> Self {
        let id = spec.id.clone();
        if self.nodes.insert(id.clone(), spec).is_some() && self.duplicate.is_none() {
            self.duplicate = Some(id.clone());
        }
        self.node_order.push(id);
        self
    }

    /// Declare a function node together with its callable.
    #[must_use]
    pub fn add_function_node(mut self, spec: NodeSpec, function: impl FunctionNode + 'static) -> Self {
        let id = spec.id.clone();
        self.functions.insert(id, Arc::new(function));
        self.add_node(spec)
    }

    /// Declare an edge. Declaration order is the tie-break order at runtime.
    #[must_use]
    pub fn add_edge(
        mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        condition: EdgeCondition,
    ) -> Self {
        self.edges.push(Edge::new(source, target, condition));
        self
    }

    /// Declare the entry node.
    #[must_use]
    pub fn entry(mut self, id: impl Into<NodeId>) -> Self {
        self.entry = Some(id.into());
        self
    }

    /// Declare a parallel fan-out: after `source` completes, `branches` run
    /// concurrently and merge at `join`. Each branch entry still needs a
    /// matching edge from `source`.
    #[must_use]
    pub fn add_parallel_group<I, S>(
        mut self,
        source: impl Into<NodeId>,
        branches: I,
        join: impl Into<NodeId>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.parallel_groups.push(ParallelGroup {
            source: source.into(),
            branches: branches.into_iter().map(Into::into).collect(),
            join: join.into(),
        });
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<Graph, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }
        if let Some(id) = self.duplicate {
            return Err(GraphError::DuplicateNode { id });
        }
        let entry = self.entry.clone().ok_or(GraphError::NoEntry)?;
        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::EntryMissing { id: entry });
        }

        for spec in self.nodes.values() {
            if spec.max_visits == 0 {
                return Err(GraphError::ZeroVisits { id: spec.id.clone() });
            }
            for key in &spec.nullable_output_keys {
                if !spec.output_keys.contains(key) {
                    return Err(GraphError::NullableNotSubset {
                        id: spec.id.clone(),
                        key: key.clone(),
                    });
                }
            }
            if spec.kind == NodeKind::Function && !self.functions.contains_key(&spec.id) {
                return Err(GraphError::FunctionMissingCallable { id: spec.id.clone() });
            }
        }

        for edge in &self.edges {
            for (end, id) in [("source", &edge.source), ("target", &edge.target)] {
                if !self.nodes.contains_key(id) {
                    return Err(GraphError::EdgeEndpointMissing {
                        id: id.clone(),
                        end,
                        from_node: edge.source.clone(),
                        target: edge.target.clone(),
                    });
                }
            }
            let source = &self.nodes[&edge.source];
            if source.kind.is_terminal() {
                return Err(GraphError::TerminalHasOutgoing {
                    id: edge.source.clone(),
                });
            }
            if matches!(
                edge.condition,
                EdgeCondition::OnVerdict {
                    verdict: Verdict::Continue
                }
            ) && !source.kind.is_event_loop()
            {
                return Err(GraphError::ContinueFromNonEventLoop {
                    id: edge.source.clone(),
                });
            }
        }

        let mut edges_by_source: FxHashMap<NodeId, Vec<usize>> = FxHashMap::default();
        for (idx, edge) in self.edges.iter().enumerate() {
            edges_by_source
                .entry(edge.source.clone())
                .or_default()
                .push(idx);
        }

        // Reachability over the full edge set, conditions ignored.
        let mut reachable: FxHashSet<NodeId> = FxHashSet::default();
        let mut queue = VecDeque::from([entry.clone()]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            for idx in edges_by_source.get(&id).into_iter().flatten() {
                queue.push_back(self.edges[*idx].target.clone());
            }
        }
        for id in self.nodes.keys() {
            if !reachable.contains(id) {
                return Err(GraphError::Unreachable { id: id.clone() });
            }
        }

        self.validate_parallel_groups(&edges_by_source)?;

        let mut parallel_groups = FxHashMap::default();
        for group in self.parallel_groups {
            parallel_groups.insert(group.source.clone(), group);
        }
        let terminal_node_ids = self
            .nodes
            .values()
            .filter(|n| n.kind.is_terminal())
            .map(|n| n.id.clone())
            .collect();

        Ok(Graph {
            nodes: self.nodes,
            node_order: self.node_order,
            edges: self.edges,
            edges_by_source,
            entry_node_id: entry,
            terminal_node_ids,
            functions: self.functions,
            parallel_groups,
        })
    }

    /// Nodes reachable from `start`, stopping at (and excluding) `join`.
    fn branch_nodes(
        &self,
        start: &NodeId,
        join: &NodeId,
        edges_by_source: &FxHashMap<NodeId, Vec<usize>>,
    ) -> FxHashSet<NodeId> {
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(id) = queue.pop_front() {
            if id == *join || !seen.insert(id.clone()) {
                continue;
            }
            for idx in edges_by_source.get(&id).into_iter().flatten() {
                queue.push_back(self.edges[*idx].target.clone());
            }
        }
        seen
    }

    fn validate_parallel_groups(
        &self,
        edges_by_source: &FxHashMap<NodeId, Vec<usize>>,
    ) -> Result<(), GraphError> {
        let group_sources: FxHashSet<&NodeId> =
            self.parallel_groups.iter().map(|g| &g.source).collect();

        for group in &self.parallel_groups {
            for id in std::iter::once(&group.source)
                .chain(group.branches.iter())
                .chain(std::iter::once(&group.join))
            {
                if !self.nodes.contains_key(id) {
                    return Err(GraphError::ParallelEndpointMissing { id: id.clone() });
                }
            }

            let branch_sets: Vec<(NodeId, FxHashSet<NodeId>)> = group
                .branches
                .iter()
                .map(|b| (b.clone(), self.branch_nodes(b, &group.join, edges_by_source)))
                .collect();

            for (branch, set) in &branch_sets {
                // Every branch must funnel into the join.
                let reaches_join = set.iter().any(|id| {
                    edges_by_source
                        .get(id)
                        .into_iter()
                        .flatten()
                        .any(|idx| self.edges[*idx].target == group.join)
                });
                if !reaches_join {
                    return Err(GraphError::ParallelBranchNoJoin {
                        from_node: group.source.clone(),
                        branch: branch.clone(),
                        join: group.join.clone(),
                    });
                }
                for id in set {
                    if group_sources.contains(id) && id != &group.source {
                        return Err(GraphError::ParallelNested {
                            from_node: group.source.clone(),
                            branch: branch.clone(),
                            nested: id.clone(),
                        });
                    }
                    if self.nodes[id].kind == NodeKind::ClientFacingEventLoop {
                        return Err(GraphError::ParallelClientFacing {
                            from_node: group.source.clone(),
                            branch: branch.clone(),
                            node: id.clone(),
                        });
                    }
                }
            }

            for (i, (branch_a, set_a)) in branch_sets.iter().enumerate() {
                for (branch_b, set_b) in branch_sets.iter().skip(i + 1) {
                    if let Some(shared) = set_a.intersection(set_b).next() {
                        return Err(GraphError::ParallelBranchOverlap {
                            from_node: group.source.clone(),
                            a: branch_a.clone(),
                            b: branch_b.clone(),
                            node: shared.clone(),
                        });
                    }
                    // A branch must not read what a sibling writes.
                    self.check_key_clash(group, branch_a, set_a, branch_b, set_b)?;
                    self.check_key_clash(group, branch_b, set_b, branch_a, set_a)?;
                }
            }
        }
        Ok(())
    }

    fn check_key_clash(
        &self,
        group: &ParallelGroup,
        reader_branch: &NodeId,
        reader_set: &FxHashSet<NodeId>,
        writer_branch: &NodeId,
        writer_set: &FxHashSet<NodeId>,
    ) -> Result<(), GraphError> {
        let written: FxHashSet<&String> = writer_set
            .iter()
            .flat_map(|id| self.nodes[id].output_keys.iter())
            .collect();
        for id in reader_set {
            for key in &self.nodes[id].input_keys {
                if written.contains(key) {
                    return Err(GraphError::ParallelKeyClash {
                        from_node: group.source.clone(),
                        reader: reader_branch.clone(),
                        writer: writer_branch.clone(),
                        key: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
