//! The graph executor: schedules node visits along selected edges,
//! enforces visit limits, runs parallel batches, writes checkpoints, and
//! drives pause/resume/recover/cancel.
//!
//! One [`Executor`] serves many runs; each run is enveloped in a durable
//! session whose id doubles as the run id. The executor aborts a run only
//! on storage failures while checkpointing, on graph invariant breaches,
//! and on explicit cancellation — everything else is surfaced into node
//! runtimes or routed along escalate edges.

pub mod control;

pub use control::{RunControl, RunHandle, control_pair};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::config::RuntimeConfig;
use crate::error::CoreError;
use crate::event_loop::{EventLoopRuntime, VisitOutcome, guarded_call};
use crate::events::{EventBus, EventLog, EventStream};
use crate::goal::Goal;
use crate::graph::Graph;
use crate::judge::Judge;
use crate::llm::LlmClient;
use crate::session::{Checkpoint, CheckpointKind, ExecutionState, Session};
use crate::session_store::SessionStore;
use crate::tools::ToolDispatcher;
use crate::types::{NodeId, NodeKind, RunId, SessionStatus, Termination, Verdict};

/// Final report of one run (or run segment, for pauses).
#[derive(Clone, Debug)]
pub struct RunResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub terminated_by: Termination,
    /// Final memory values (attribution stripped).
    pub memory: FxHashMap<String, Value>,
    pub state: ExecutionState,
}

/// Where `drive` enters the scheduling loop.
enum EntryMode {
    /// Fresh run from the graph's entry node.
    Start,
    /// Re-run this node without counting a new visit (recovery).
    RunNode(NodeId),
    /// Re-enter a suspended visit of this node (no new visit counted).
    ResumeVisit(NodeId),
    /// Continue from edge selection at `last_node_id`.
    EdgeSelection,
}

/// What the scheduling loop does next.
enum Pending {
    Run {
        node: NodeId,
        count_visit: bool,
        resume: Option<crate::event_loop::VisitState>,
    },
    SelectEdge,
}

/// Per-branch result of a parallel batch.
struct BranchRun {
    writes: Vec<(String, crate::memory::MemoryEntry)>,
    visits: FxHashMap<NodeId, u32>,
    completed: FxHashSet<NodeId>,
}

/// The runtime engine behind `execute`/`resume`/`recover`/`pause`/`cancel`.
pub struct Executor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolDispatcher>,
    judge: Arc<dyn Judge>,
    store: Arc<dyn SessionStore>,
    log: EventLog,
    bus: EventBus,
    config: RuntimeConfig,
    controls: Mutex<FxHashMap<RunId, Arc<RunHandle>>>,
}

impl Executor {
    /// Build an executor over the four collaborators and a config.
    ///
    /// The event bus is materialized from `config.hub`; every appended step
    /// and status change fans out to its sinks and subscribers.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolDispatcher>,
        judge: Arc<dyn Judge>,
        store: Arc<dyn SessionStore>,
        config: RuntimeConfig,
    ) -> Self {
        let bus = config.hub.build_event_bus();
        bus.listen_for_events();
        let log = EventLog::with_emitter(bus.get_emitter());
        Self {
            llm,
            tools,
            judge,
            store,
            log,
            bus,
            config,
            controls: Mutex::new(FxHashMap::default()),
        }
    }

    /// The shared event log (L1/L2/L3 queries).
    #[must_use]
    pub fn event_log(&self) -> EventLog {
        self.log.clone()
    }

    /// Subscribe to the live event feed. Observers cannot mutate state.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Execute a run of `graph` toward `goal`, seeded with `input`.
    #[instrument(skip_all, fields(goal = %goal.id, agent = %agent_name))]
    pub async fn execute(
        &self,
        graph: &Graph,
        goal: &Goal,
        agent_name: &str,
        input: Value,
    ) -> Result<RunResult, CoreError> {
        goal.validate()?;
        graph.validate_tools(self.tools.as_ref())?;

        let session = Session::create(agent_name, input);
        let session_id = session.session_id.clone();
        self.store
            .create_session(&session)
            .await
            .map_err(CoreError::from)?;
        self.log.set_run_status(&session_id, SessionStatus::Active);

        self.drive(graph, goal, &session_id, session.execution_state, EntryMode::Start)
            .await
    }

    /// Resume a paused or failed session. The paused node's visit count is
    /// not incremented again: the resumed visit is a continuation.
    #[instrument(skip_all, fields(session = %session_id))]
    pub async fn resume(
        &self,
        graph: &Graph,
        goal: &Goal,
        session_id: &str,
    ) -> Result<RunResult, CoreError> {
        let session = self
            .store
            .load_session(session_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        if !session.status.is_resumable() {
            return Err(CoreError::SessionNotResumable {
                session_id: session_id.to_string(),
                status: session.status,
            });
        }
        goal.validate()?;
        graph.validate_tools(self.tools.as_ref())?;

        self.store
            .set_status(session_id, SessionStatus::Active)
            .await
            .map_err(CoreError::from)?;
        self.log.set_run_status(session_id, SessionStatus::Active);

        let mut state = session.execution_state;
        let mode = match state.paused_at.take() {
            Some(node) => EntryMode::ResumeVisit(node),
            None if state.last_node_id.is_some() => EntryMode::EdgeSelection,
            None => EntryMode::Start,
        };
        self.drive(graph, goal, session_id, state, mode).await
    }

    /// Rewind to a prior checkpoint and continue from there. Checkpoints
    /// and events after the chosen checkpoint's timestamp are discarded.
    #[instrument(skip_all, fields(session = %session_id, checkpoint = %checkpoint_id))]
    pub async fn recover(
        &self,
        graph: &Graph,
        goal: &Goal,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<RunResult, CoreError> {
        self.store
            .load_session(session_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        goal.validate()?;
        graph.validate_tools(self.tools.as_ref())?;

        let checkpoint = self
            .store
            .truncate_checkpoints_after(session_id, checkpoint_id)
            .await
            .map_err(CoreError::from)?;
        self.log.truncate_after(session_id, checkpoint.ts);
        self.store
            .set_status(session_id, SessionStatus::Active)
            .await
            .map_err(CoreError::from)?;
        self.log.set_run_status(session_id, SessionStatus::Active);

        let mut state = checkpoint.state;
        let mode = match checkpoint.kind {
            CheckpointKind::Pause | CheckpointKind::Periodic => match state.paused_at.take() {
                Some(node) => EntryMode::ResumeVisit(node),
                None => EntryMode::EdgeSelection,
            },
            // Re-enter the graph at last_node_id with the snapshot memory.
            CheckpointKind::NodeEntry | CheckpointKind::NodeComplete => {
                match state.last_node_id.clone() {
                    Some(node) => EntryMode::RunNode(node),
                    None => EntryMode::Start,
                }
            }
        };
        self.drive(graph, goal, session_id, state, mode).await
    }

    /// Asynchronously request a pause. The run suspends at its next
    /// inter-step boundary and writes a `pause` checkpoint.
    pub fn pause(&self, run_id: &str) -> Result<(), CoreError> {
        let controls = self.controls.lock();
        let handle = controls
            .get(run_id)
            .ok_or_else(|| CoreError::SessionNotFound {
                session_id: run_id.to_string(),
            })?;
        handle.request_pause();
        Ok(())
    }

    /// Like pause but terminal: the session will not be resumable.
    pub fn cancel(&self, run_id: &str) -> Result<(), CoreError> {
        let controls = self.controls.lock();
        let handle = controls
            .get(run_id)
            .ok_or_else(|| CoreError::SessionNotFound {
                session_id: run_id.to_string(),
            })?;
        handle.request_cancel();
        Ok(())
    }

    /// Stage a user reply for a suspended client-facing visit. The resumed
    /// visit consumes it and logs `user_input_received`.
    pub async fn supply_user_input(
        &self,
        session_id: &str,
        text: impl Into<String>,
    ) -> Result<(), CoreError> {
        let mut session = self
            .store
            .load_session(session_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        session.execution_state.pending_user_input = Some(text.into());
        self.store
            .save_state(session_id, &session.execution_state)
            .await
            .map_err(CoreError::from)
    }

    /* ---------------- internal driving loop ---------------- */

    async fn drive(
        &self,
        graph: &Graph,
        goal: &Goal,
        session_id: &str,
        mut state: ExecutionState,
        mode: EntryMode,
    ) -> Result<RunResult, CoreError> {
        let (handle, ctl) = control_pair();
        self.controls
            .lock()
            .insert(session_id.to_string(), Arc::new(handle));

        let outcome = self
            .drive_inner(graph, goal, session_id, &mut state, mode, ctl)
            .await;
        self.controls.lock().remove(session_id);

        let (status, termination) = match &outcome {
            Ok(Termination::TerminalNode) => (SessionStatus::Completed, Termination::TerminalNode),
            Ok(Termination::PauseRequested) => {
                (SessionStatus::Paused, Termination::PauseRequested)
            }
            Ok(Termination::Cancelled) => (SessionStatus::Cancelled, Termination::Cancelled),
            Ok(t) => (SessionStatus::Failed, *t),
            Err(_) => (SessionStatus::Failed, Termination::NoValidEdge),
        };

        // Best-effort final persistence; checkpoint failures already aborted.
        let _ = self.store.save_state(session_id, &state).await;
        let _ = self.store.set_status(session_id, status).await;
        self.log.set_run_status(session_id, status);

        match outcome {
            Err(err) => Err(err),
            Ok(_) => Ok(RunResult {
                session_id: session_id.to_string(),
                status,
                terminated_by: termination,
                memory: state.memory.snapshot(),
                state,
            }),
        }
    }

    async fn drive_inner(
        &self,
        graph: &Graph,
        goal: &Goal,
        session_id: &str,
        state: &mut ExecutionState,
        mode: EntryMode,
        ctl: RunControl,
    ) -> Result<Termination, CoreError> {
        let mut pending = match mode {
            EntryMode::Start => Pending::Run {
                node: graph.entry_node_id().clone(),
                count_visit: true,
                resume: None,
            },
            EntryMode::RunNode(node) => Pending::Run {
                node,
                count_visit: false,
                resume: None,
            },
            EntryMode::ResumeVisit(node) => {
                let resume = state.paused_visit.take();
                Pending::Run {
                    node,
                    count_visit: false,
                    resume,
                }
            }
            EntryMode::EdgeSelection => Pending::SelectEdge,
        };

        loop {
            if ctl.cancel_requested() {
                return Ok(Termination::Cancelled);
            }
            if ctl.pause_requested() {
                self.write_checkpoint(session_id, state, CheckpointKind::Pause)
                    .await?;
                return Ok(Termination::PauseRequested);
            }

            match pending {
                Pending::SelectEdge => {
                    let source = state.last_node_id.clone().ok_or_else(|| {
                        CoreError::GraphInvalid {
                            reason: "edge selection with no prior node".into(),
                        }
                    })?;

                    if graph.parallel_batch_ready(&source, state.last_verdict, &state.memory) {
                        let join = self
                            .run_parallel_batch(graph, goal, session_id, state, &source, &ctl)
                            .await?;
                        state.last_verdict = Some(Verdict::Accept);
                        pending = Pending::Run {
                            node: join,
                            count_visit: true,
                            resume: None,
                        };
                        continue;
                    }

                    match graph.next_edge(&source, state.last_verdict, &state.memory) {
                        Some(edge) => {
                            pending = Pending::Run {
                                node: edge.target.clone(),
                                count_visit: true,
                                resume: None,
                            };
                        }
                        None => {
                            self.log.diagnostic(
                                "executor",
                                format!("no valid edge out of {source} (run {session_id})"),
                            );
                            return Ok(Termination::NoValidEdge);
                        }
                    }
                }

                Pending::Run {
                    node: node_id,
                    count_visit,
                    resume,
                } => {
                    let node =
                        graph
                            .node(&node_id)
                            .ok_or_else(|| CoreError::GraphInvalid {
                                reason: format!("edge target {node_id} is not in the graph"),
                            })?;

                    if node.kind.is_terminal() {
                        state.last_node_id = Some(node_id.clone());
                        state.completed_nodes.insert(node_id);
                        return Ok(Termination::TerminalNode);
                    }

                    if count_visit {
                        // Check before counting: visit_counts never exceed
                        // the declared bound.
                        if state.visit_count(&node_id) + 1 > node.max_visits {
                            self.log.diagnostic(
                                "executor",
                                format!(
                                    "node {node_id} exceeded max_visits ({}) in run {session_id}",
                                    node.max_visits
                                ),
                            );
                            let repeat_breach = state
                                .failed_nodes
                                .insert(node_id.clone(), "max_visits exceeded".into())
                                .is_some();
                            state.last_node_id = Some(node_id.clone());
                            state.last_verdict = Some(Verdict::Escalate);
                            // An escalate edge may route away from the
                            // breach, but a second breach of the same node
                            // ends the run rather than cycling.
                            if !repeat_breach
                                && graph
                                    .next_edge(&node_id, Some(Verdict::Escalate), &state.memory)
                                    .is_some()
                            {
                                pending = Pending::SelectEdge;
                                continue;
                            }
                            return Ok(Termination::MaxVisits);
                        }
                        let visit = state.record_visit(&node_id);
                        state.last_node_id = Some(node_id.clone());
                        self.log.diagnostic(
                            "node",
                            format!("enter {node_id} visit {visit} (run {session_id})"),
                        );
                        self.write_checkpoint(session_id, state, CheckpointKind::NodeEntry)
                            .await?;
                    } else {
                        state.last_node_id = Some(node_id.clone());
                    }

                    match node.kind {
                        NodeKind::Function => {
                            match self
                                .run_function_node(graph, session_id, state, &node_id, &ctl)
                                .await?
                            {
                                Some(termination) => return Ok(termination),
                                None => pending = Pending::SelectEdge,
                            }
                        }
                        NodeKind::EventLoop | NodeKind::ClientFacingEventLoop => {
                            match self
                                .run_event_loop_node(
                                    graph, goal, session_id, state, &node_id, resume, &ctl,
                                )
                                .await?
                            {
                                Some(termination) => return Ok(termination),
                                None => pending = Pending::SelectEdge,
                            }
                        }
                        NodeKind::Terminal => unreachable!("terminal handled above"),
                    }

                    self.store
                        .save_state(session_id, state)
                        .await
                        .map_err(CoreError::from)?;
                }
            }
        }
    }

    /// Run one function-node application. Returns `Some(termination)` when
    /// the run must stop, `None` to continue with edge selection.
    async fn run_function_node(
        &self,
        graph: &Graph,
        session_id: &str,
        state: &mut ExecutionState,
        node_id: &str,
        ctl: &RunControl,
    ) -> Result<Option<Termination>, CoreError> {
        let node = graph.node(node_id).expect("caller resolved node");
        let function = graph
            .function(node_id)
            .ok_or_else(|| CoreError::GraphInvalid {
                reason: format!("function node {node_id} has no callable"),
            })?;

        let missing: Vec<&String> = node
            .input_keys
            .iter()
            .filter(|k| !state.memory.contains_key(k))
            .collect();
        if !missing.is_empty() {
            state.failed_nodes.insert(
                node_id.to_string(),
                format!("missing inputs: {missing:?}"),
            );
            state.last_verdict = Some(Verdict::Escalate);
            return Ok(None);
        }

        let inputs = state.memory.collect_keys(&node.input_keys);
        let outcome = guarded_call(
            ctl,
            self.config.step_timeout,
            self.config.quiescence,
            function.apply(inputs),
        )
        .await;

        match outcome {
            Err(true) => return Ok(Some(Termination::Cancelled)),
            Err(false) => {
                self.write_checkpoint(session_id, state, CheckpointKind::Pause)
                    .await?;
                return Ok(Some(Termination::PauseRequested));
            }
            Ok(None) => {
                state
                    .failed_nodes
                    .insert(node_id.to_string(), "function timed out".into());
                state.last_verdict = Some(Verdict::Escalate);
            }
            Ok(Some(Err(err))) => {
                state.failed_nodes.insert(node_id.to_string(), err.message);
                state.last_verdict = Some(Verdict::Escalate);
            }
            Ok(Some(Ok(outputs))) => {
                if let Some(unknown) =
                    outputs.keys().find(|k| !node.output_keys.contains(*k))
                {
                    state.failed_nodes.insert(
                        node_id.to_string(),
                        format!("undeclared output key {unknown:?}"),
                    );
                    state.last_verdict = Some(Verdict::Escalate);
                } else {
                    state.step_counter += 1;
                    let step = state.step_counter;
                    state.memory.write_outputs(node_id, outputs, step);
                    state.completed_nodes.insert(node_id.to_string());
                    state.last_verdict = Some(Verdict::Accept);
                    self.write_checkpoint(session_id, state, CheckpointKind::NodeComplete)
                        .await?;
                }
            }
        }
        Ok(None)
    }

    /// Run (or resume) one event-loop visit. Returns `Some(termination)`
    /// when the run must stop, `None` to continue with edge selection.
    #[allow(clippy::too_many_arguments)]
    async fn run_event_loop_node(
        &self,
        graph: &Graph,
        goal: &Goal,
        session_id: &str,
        state: &mut ExecutionState,
        node_id: &str,
        resume: Option<crate::event_loop::VisitState>,
        ctl: &RunControl,
    ) -> Result<Option<Termination>, CoreError> {
        let node = graph.node(node_id).expect("caller resolved node");
        let runtime = EventLoopRuntime {
            node,
            goal,
            llm: Arc::clone(&self.llm),
            tools: Arc::clone(&self.tools),
            judge: Arc::clone(&self.judge),
            log: self.log.clone(),
            config: &self.config,
            control: ctl.clone(),
        };

        let user_input = state.pending_user_input.take();
        let mut outcome = runtime
            .run_visit(session_id, &mut state.memory, resume, user_input)
            .await;

        // Periodic checkpoints land between steps; re-enter immediately.
        while let VisitOutcome::CheckpointDue(visit) = outcome {
            state.paused_at = Some(node_id.to_string());
            state.paused_visit = Some(visit.clone());
            self.write_checkpoint(session_id, state, CheckpointKind::Periodic)
                .await?;
            state.paused_at = None;
            state.paused_visit = None;
            outcome = runtime
                .run_visit(session_id, &mut state.memory, Some(visit), None)
                .await;
        }

        state.step_counter = self.log.steps(session_id, None).len() as u64;

        match outcome {
            VisitOutcome::Verdict(evaluation) => {
                state.last_verdict = Some(evaluation.verdict);
                self.log.diagnostic(
                    "node",
                    format!("exit {node_id} with {} (run {session_id})", evaluation.verdict),
                );
                let hard_violation = evaluation
                    .violated_constraints
                    .iter()
                    .find(|id| {
                        goal.constraint(id)
                            .map(|c| c.kind == crate::goal::ConstraintKind::Hard)
                            .unwrap_or(false)
                    })
                    .cloned();
                if let Some(constraint_id) = hard_violation {
                    state.failed_nodes.insert(
                        node_id.to_string(),
                        format!("hard constraint violated: {constraint_id}"),
                    );
                    return Ok(Some(Termination::HardConstraint));
                }
                if evaluation.verdict == Verdict::Accept {
                    state.completed_nodes.insert(node_id.to_string());
                    self.write_checkpoint(session_id, state, CheckpointKind::NodeComplete)
                        .await?;
                } else if evaluation.verdict == Verdict::Escalate {
                    if let Some(reason) = evaluation.feedback {
                        state.failed_nodes.insert(node_id.to_string(), reason);
                    }
                }
                Ok(None)
            }
            VisitOutcome::Suspended(visit) => {
                state.paused_at = Some(node_id.to_string());
                state.paused_visit = Some(visit);
                self.write_checkpoint(session_id, state, CheckpointKind::Pause)
                    .await?;
                Ok(Some(Termination::PauseRequested))
            }
            VisitOutcome::Interrupted {
                state: visit,
                cancelled,
            } => {
                if cancelled {
                    return Ok(Some(Termination::Cancelled));
                }
                state.paused_at = Some(node_id.to_string());
                state.paused_visit = Some(visit);
                self.write_checkpoint(session_id, state, CheckpointKind::Pause)
                    .await?;
                Ok(Some(Termination::PauseRequested))
            }
            VisitOutcome::CheckpointDue(_) => unreachable!("drained above"),
        }
    }

    /// Run all branches of the declared group at `source` concurrently on
    /// memory forks, then merge in declared order. Returns the join node.
    async fn run_parallel_batch(
        &self,
        graph: &Graph,
        goal: &Goal,
        session_id: &str,
        state: &mut ExecutionState,
        source: &str,
        ctl: &RunControl,
    ) -> Result<NodeId, CoreError> {
        let group = graph
            .parallel_group(source)
            .expect("caller checked batch readiness")
            .clone();
        let pool = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));

        let results = {
            let base: &ExecutionState = &*state;
            let branch_futures = group.branches.iter().map(|entry| {
                self.run_branch(
                    graph,
                    goal,
                    session_id,
                    base,
                    entry.clone(),
                    group.join.clone(),
                    ctl.without_pause(),
                    Arc::clone(&pool),
                )
            });
            futures_util::future::join_all(branch_futures).await
        };

        let mut writes_in_order = Vec::with_capacity(results.len());
        let mut merged_visits: FxHashMap<NodeId, u32> = FxHashMap::default();
        let mut merged_completed: FxHashSet<NodeId> = FxHashSet::default();
        for result in results {
            let branch = result?;
            writes_in_order.push(branch.writes);
            for (node, count) in branch.visits {
                *merged_visits.entry(node).or_default() += count;
            }
            merged_completed.extend(branch.completed);
        }

        state.memory.merge_branches(writes_in_order)?;
        for (node, count) in merged_visits {
            *state.visit_counts.entry(node).or_default() += count;
        }
        state.completed_nodes.extend(merged_completed);
        Ok(group.join)
    }

    /// Drive one branch from its entry until the edge into the join fires.
    #[allow(clippy::too_many_arguments)]
    async fn run_branch(
        &self,
        graph: &Graph,
        goal: &Goal,
        session_id: &str,
        base: &ExecutionState,
        entry: NodeId,
        join: NodeId,
        ctl: RunControl,
        pool: Arc<Semaphore>,
    ) -> Result<BranchRun, CoreError> {
        let _permit = pool
            .acquire()
            .await
            .map_err(|_| CoreError::Cancelled {
                run_id: session_id.to_string(),
            })?;

        let mut memory = base.memory.fork();
        let mut visits: FxHashMap<NodeId, u32> = FxHashMap::default();
        let mut completed: FxHashSet<NodeId> = FxHashSet::default();
        let mut last_verdict: Option<Verdict> = None;
        let mut current = entry;

        loop {
            if ctl.cancel_requested() {
                return Err(CoreError::Cancelled {
                    run_id: session_id.to_string(),
                });
            }
            let node = graph
                .node(&current)
                .ok_or_else(|| CoreError::GraphInvalid {
                    reason: format!("branch node {current} is not in the graph"),
                })?;
            if node.kind.is_terminal() {
                return Err(CoreError::GraphInvalid {
                    reason: format!("terminal node {current} inside a parallel branch"),
                });
            }

            let local = visits.entry(current.clone()).or_default();
            if base.visit_count(&current) + *local + 1 > node.max_visits {
                return Err(CoreError::NodeMaxVisits {
                    node_id: current.clone(),
                    max_visits: node.max_visits,
                });
            }
            *local += 1;

            match node.kind {
                NodeKind::Function => {
                    let function =
                        graph
                            .function(&current)
                            .ok_or_else(|| CoreError::GraphInvalid {
                                reason: format!("function node {current} has no callable"),
                            })?;
                    let inputs = memory.collect_keys(&node.input_keys);
                    match guarded_call(
                        &ctl,
                        self.config.step_timeout,
                        self.config.quiescence,
                        function.apply(inputs),
                    )
                    .await
                    {
                        Err(_) => {
                            return Err(CoreError::Cancelled {
                                run_id: session_id.to_string(),
                            });
                        }
                        Ok(None) => last_verdict = Some(Verdict::Escalate),
                        Ok(Some(Err(_))) => last_verdict = Some(Verdict::Escalate),
                        Ok(Some(Ok(outputs))) => {
                            memory.write_outputs(&current, outputs, 0);
                            completed.insert(current.clone());
                            last_verdict = Some(Verdict::Accept);
                        }
                    }
                }
                NodeKind::EventLoop => {
                    let runtime = EventLoopRuntime {
                        node,
                        goal,
                        llm: Arc::clone(&self.llm),
                        tools: Arc::clone(&self.tools),
                        judge: Arc::clone(&self.judge),
                        log: self.log.clone(),
                        config: &self.config,
                        control: ctl.clone(),
                    };
                    let mut resume = None;
                    let outcome = loop {
                        match runtime
                            .run_visit(session_id, &mut memory, resume.take(), None)
                            .await
                        {
                            // No durable checkpoint mid-branch; re-enter.
                            VisitOutcome::CheckpointDue(visit) => resume = Some(visit),
                            other => break other,
                        }
                    };
                    match outcome {
                        VisitOutcome::Verdict(evaluation) => {
                            if evaluation.verdict == Verdict::Accept {
                                completed.insert(current.clone());
                            }
                            last_verdict = Some(evaluation.verdict);
                        }
                        VisitOutcome::Interrupted { cancelled: true, .. } => {
                            return Err(CoreError::Cancelled {
                                run_id: session_id.to_string(),
                            });
                        }
                        // Pause is masked and client-facing nodes are
                        // rejected statically, so neither can arrive here.
                        VisitOutcome::Interrupted { .. }
                        | VisitOutcome::Suspended(_)
                        | VisitOutcome::CheckpointDue(_) => {
                            return Err(CoreError::GraphInvalid {
                                reason: format!(
                                    "branch node {current} suspended inside a parallel batch"
                                ),
                            });
                        }
                    }
                }
                NodeKind::ClientFacingEventLoop | NodeKind::Terminal => {
                    return Err(CoreError::GraphInvalid {
                        reason: format!("node {current} is not allowed inside a parallel branch"),
                    });
                }
            }

            match graph.next_edge(&current, last_verdict, &memory) {
                Some(edge) if edge.target == join => break,
                Some(edge) => current = edge.target.clone(),
                None => {
                    return Err(CoreError::NoValidEdge {
                        node_id: current.clone(),
                    });
                }
            }
        }

        Ok(BranchRun {
            writes: memory.take_branch_writes(),
            visits,
            completed,
        })
    }

    async fn write_checkpoint(
        &self,
        session_id: &str,
        state: &ExecutionState,
        kind: CheckpointKind,
    ) -> Result<(), CoreError> {
        let checkpoint = Checkpoint::capture(kind, state);
        self.store
            .append_checkpoint(session_id, checkpoint)
            .await
            .map_err(CoreError::from)
    }
}
