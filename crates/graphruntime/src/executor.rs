use crate::config::RunOptions;
use crate::orchestrator::{ExecutionOrchestrator, CATCH_PORT};
use crate::registry::NodeRegistry;
use crate::resolver::VariableResolver;
use crate::state::{CleanupReport, ExecutionState};
use futures::FutureExt;
use graphcore::{
    EventEmitter, EventKind, EventSink, ExecutionEvent, ExecutionId, FlowError, Node, NodeContext,
    NodeError, NodeExecutionError, NodeId, NodeInstance, NodeOutput, NodeStatus, NoopSink,
    RunStatus, Value, WorkflowGraph,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Drives one workflow graph to a terminal state.
///
/// Nodes run one at a time in FIFO order starting from the start node.
/// Each run owns its own `ExecutionState`, so one use case can serve
/// several concurrent runs.
pub struct ExecuteWorkflowUseCase {
    registry: Arc<NodeRegistry>,
    sink: Arc<dyn EventSink>,
    resolver: VariableResolver,
    stop: Mutex<CancellationToken>,
}

impl ExecuteWorkflowUseCase {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            sink: Arc::new(NoopSink),
            resolver: VariableResolver::new(),
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_resolver(mut self, resolver: VariableResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Ask every run in flight to stop at its next node boundary.
    ///
    /// Runs started afterwards are unaffected.
    pub fn stop(&self) {
        let mut token = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!("Stop requested");
        token.cancel();
        *token = CancellationToken::new();
    }

    fn run_token(&self) -> CancellationToken {
        self.stop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token()
    }

    /// Execute `graph` to completion.
    ///
    /// Structural problems (no start node, unknown target, unknown node type...)
    /// are returned as `Err` before any node runs. Node failures, stops and
    /// timeouts are reported through the returned `ExecutionResult`.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        initial_variables: HashMap<String, Value>,
        options: RunOptions,
    ) -> Result<ExecutionResult, FlowError> {
        let started = Instant::now();

        graph.validate()?;
        let orchestrator = ExecutionOrchestrator::new(graph);
        let start = orchestrator.find_start_node()?;
        let required = match &options.target_node_id {
            Some(target) => Some(orchestrator.calculate_execution_path(target)?),
            None => None,
        };
        let is_required = |id: &str| required.as_ref().map_or(true, |r| r.contains(id));

        let mut instances: HashMap<NodeId, Box<dyn Node>> = HashMap::new();
        for node in graph.nodes.iter().filter(|n| is_required(&n.id)) {
            instances.insert(node.id.clone(), self.registry.instantiate(node)?);
        }

        let run_token = self.run_token();
        let _bridge = options
            .cancellation
            .clone()
            .map(|external| bridge_cancellation(external, run_token.clone()));

        let mut state = ExecutionState::new(
            graph.name.as_str(),
            graph.nodes.iter().map(|n| n.id.clone()),
            &graph.variables,
            initial_variables,
        )
        .with_resolver(self.resolver.clone())
        .with_stop_token(run_token)
        .with_continue_on_error(options.continue_on_error)
        .with_cleanup_timeout(options.cleanup_timeout);
        state.set_required_total(required.as_ref().map_or(graph.nodes.len(), HashSet::len));
        state.transition(RunStatus::Running);

        tracing::info!(
            "Starting workflow '{}' (run {}, {} required nodes)",
            graph.name,
            state.run_id(),
            state.required_total()
        );
        let mut started_event = self
            .event(&state, EventKind::WorkflowStarted)
            .with("workflow_id", graph.id.to_string())
            .with("total_nodes", state.required_total());
        if let Some(target) = &options.target_node_id {
            started_event = started_event.with("target_node_id", target.clone());
        }
        self.sink.emit(started_event);

        let mut initialized: HashSet<NodeId> = HashSet::new();
        let mut queue = VecDeque::from([start.id.clone()]);
        let mut enqueued: HashSet<NodeId> = HashSet::from([start.id.clone()]);
        let mut first_failure: Option<NodeExecutionError> = None;
        let mut stopped = false;
        // failed nodes and everything skipped because of them
        let mut tainted: HashSet<NodeId> = HashSet::new();
        // try/catch nodes that already caught a failure
        let mut handled: HashSet<NodeId> = HashSet::new();

        loop {
            // the bridge task may not have been polled yet
            if options
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                state.request_stop();
            }
            if state.stop_requested() {
                tracing::info!("Run {} observed stop request", state.run_id());
                stopped = true;
                break;
            }
            let Some(node_id) = queue.pop_front() else {
                break;
            };
            let Some(node) = graph.find_node(&node_id) else {
                continue;
            };

            if !is_required(&node_id) {
                self.skip(&mut state, &node_id, "not_required");
                continue;
            }
            if let Some(upstream) = failed_data_dependency(graph, &tainted, &node_id) {
                tracing::info!("Skipping {}: input from failed node {}", node_id, upstream);
                self.skip(&mut state, &node_id, "upstream_failed");
                tainted.insert(node_id.clone());
                continue;
            }
            let Some(instance) = instances.get_mut(&node_id) else {
                continue;
            };

            let first_run = initialized.insert(node_id.clone());
            match self
                .run_node(graph, node, instance, first_run, &mut state, &options)
                .await
            {
                Ok(output) => {
                    for next in orchestrator.get_next_nodes(node, Some(&output)) {
                        if enqueued.insert(next.clone()) {
                            queue.push_back(next);
                        }
                    }
                }
                Err(message) => {
                    tainted.insert(node_id.clone());
                    let handler = orchestrator.find_catch_handler(
                        &node_id,
                        state.execution_order().iter().filter(|id| {
                            !handled.contains(*id) && state.node_status(id) == NodeStatus::Succeeded
                        }),
                    );
                    if let Some(handler) = handler {
                        self.catch_failure(&mut state, handler, &node_id, &message);
                        handled.insert(handler.id.clone());
                        for next in orchestrator.branch_targets(&handler.id, CATCH_PORT) {
                            if enqueued.insert(next.to_string()) {
                                queue.push_back(next.to_string());
                            }
                        }
                        continue;
                    }

                    let failure = NodeExecutionError::new(node_id.clone(), message);
                    first_failure.get_or_insert(failure);
                    if !state.continue_on_error() {
                        tracing::info!(
                            "Halting run {} after failure of {}",
                            state.run_id(),
                            node_id
                        );
                        break;
                    }
                }
            }
        }

        for node_id in state.skip_unvisited() {
            self.sink.emit(
                self.event(&state, EventKind::NodeSkipped)
                    .with("node_id", node_id)
                    .with("reason", "not_visited"),
            );
        }

        // a node cut short by the stop signal counts as stopped, not failed
        let outcome = if stopped || state.stop_requested() {
            RunStatus::Stopped
        } else if first_failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        state.transition(outcome);

        instances.retain(|id, _| initialized.contains(id));
        let cleanup = state.cleanup(options.cleanup_timeout, &mut instances).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let terminal = match outcome {
            RunStatus::Stopped => self.event(&state, EventKind::WorkflowStopped),
            RunStatus::Failed => {
                let mut event = self.event(&state, EventKind::WorkflowError);
                if let Some(failure) = &first_failure {
                    event = event
                        .with("node_id", failure.node_id.clone())
                        .with("error", failure.message.clone());
                }
                event
            }
            _ => self.event(&state, EventKind::WorkflowCompleted),
        };
        self.sink.emit(
            terminal
                .with("duration_ms", duration_ms as f64)
                .with("completed_nodes", state.execution_order().len()),
        );

        tracing::info!(
            "Workflow '{}' finished: {} in {}ms",
            graph.name,
            outcome,
            duration_ms
        );

        Ok(ExecutionResult::from_state(
            &state,
            first_failure,
            cleanup,
            duration_ms,
        ))
    }

    async fn run_node(
        &self,
        graph: &WorkflowGraph,
        node: &NodeInstance,
        instance: &mut Box<dyn Node>,
        first_run: bool,
        state: &mut ExecutionState,
        options: &RunOptions,
    ) -> Result<NodeOutput, String> {
        state.mark_running(&node.id);
        tracing::info!("Starting node {} ({})", node.id, node.node_type);
        self.sink.emit(
            self.event(state, EventKind::NodeStarted)
                .with("node_id", node.id.clone())
                .with("node_type", node.node_type.clone())
                .with("progress", state.progress()),
        );

        let started = Instant::now();
        let result = self
            .invoke(graph, node, instance, first_run, state, options)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(mut output) => {
                output.metadata.execution_time_ms = duration_ms;
                state.merge_node_output(&node.id, output.outputs.clone());
                for (key, value) in &output.variables {
                    state.set_variable(key.clone(), value.clone());
                }
                state.mark_succeeded(&node.id);
                tracing::info!("Node {} completed in {}ms", node.id, duration_ms);

                let mut event = self
                    .event(state, EventKind::NodeCompleted)
                    .with("node_id", node.id.clone())
                    .with("duration_ms", duration_ms as f64)
                    .with("progress", state.progress())
                    .with("outputs", Value::Map(output.outputs.clone()));
                if let Some(branch) = &output.branch {
                    event = event.with("branch", branch.clone());
                }
                self.sink.emit(event);
                Ok(output)
            }
            Err(e) => {
                let message = e.to_string();
                state.mark_failed(&node.id, message.clone());
                tracing::error!("Node {} failed: {}", node.id, message);
                self.sink.emit(
                    self.event(state, EventKind::NodeFailed)
                        .with("node_id", node.id.clone())
                        .with("error", message.clone()),
                );
                Err(message)
            }
        }
    }

    /// Resolve parameters, gather data inputs and call the node's capability
    async fn invoke(
        &self,
        graph: &WorkflowGraph,
        node: &NodeInstance,
        instance: &mut Box<dyn Node>,
        first_run: bool,
        state: &ExecutionState,
        options: &RunOptions,
    ) -> Result<NodeOutput, NodeError> {
        if first_run {
            instance.initialize().await?;
        }

        let parameters = node
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), state.resolve_value(v)))
            .collect();

        let mut inputs = HashMap::new();
        for conn in graph.data_inputs_of(&node.id) {
            if let Some(value) = state.scope().node_output(&conn.source.node, &conn.source.port) {
                inputs.insert(conn.target.port.clone(), value.clone());
            }
        }

        let ctx = NodeContext {
            node_id: node.id.clone(),
            parameters,
            inputs,
            resources: state.resources().clone(),
            events: EventEmitter::new(
                state.run_id(),
                Arc::clone(state.workflow_name()),
                node.id.clone(),
                Arc::clone(&self.sink),
            ),
            cancellation: state.stop_token().clone(),
            variables: Arc::new(state.snapshot()),
        };

        let execution = AssertUnwindSafe(instance.execute(ctx)).catch_unwind();
        let outcome = match options.node_timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(NodeError::Timeout {
                        millis: limit.as_millis() as u64,
                    })
                }
            },
            None => execution.await,
        };

        outcome.unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(NodeError::ExecutionFailed(format!("node panicked: {}", reason)))
        })
    }

    /// Record a failure caught by `handler` and expose it as the handler's
    /// `error` and `failed_node` outputs for the catch path.
    fn catch_failure(
        &self,
        state: &mut ExecutionState,
        handler: &NodeInstance,
        failed_id: &str,
        message: &str,
    ) {
        tracing::warn!("Failure of {} caught by {}: {}", failed_id, handler.id, message);
        state.merge_node_output(
            &handler.id,
            HashMap::from([
                ("error".to_string(), Value::from(message)),
                ("failed_node".to_string(), Value::from(failed_id)),
            ]),
        );
        self.sink.emit(
            self.event(state, EventKind::NodeMessage)
                .with("node_id", handler.id.clone())
                .with("level", "warn")
                .with("message", format!("caught failure of {}: {}", failed_id, message)),
        );
    }

    fn skip(&self, state: &mut ExecutionState, node_id: &str, reason: &str) {
        if state.mark_skipped(node_id) {
            tracing::debug!("Skipped node {} ({})", node_id, reason);
            self.sink.emit(
                self.event(state, EventKind::NodeSkipped)
                    .with("node_id", node_id)
                    .with("reason", reason),
            );
        }
    }

    fn event(&self, state: &ExecutionState, kind: EventKind) -> ExecutionEvent {
        ExecutionEvent::new(kind, state.run_id(), &**state.workflow_name())
    }
}

/// First node feeding `node_id` over a data connection that failed in this
/// run, or was itself skipped because of a failure
fn failed_data_dependency<'a>(
    graph: &'a WorkflowGraph,
    tainted: &HashSet<NodeId>,
    node_id: &'a str,
) -> Option<&'a str> {
    graph
        .data_inputs_of(node_id)
        .map(|c| c.source.node.as_str())
        .find(|source| tainted.contains(*source))
}

/// Cancel `run` when `external` is cancelled, for as long as the guard lives
fn bridge_cancellation(external: CancellationToken, run: CancellationToken) -> DropGuard {
    let done = CancellationToken::new();
    let guard = done.clone().drop_guard();
    if external.is_cancelled() {
        run.cancel();
        return guard;
    }
    tokio::spawn(async move {
        tokio::select! {
            _ = external.cancelled() => run.cancel(),
            _ = done.cancelled() => {}
        }
    });
    guard
}

/// Final status of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutcome {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub error: Option<String>,
}

/// Result of workflow execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub workflow_name: String,
    pub status: RunStatus,
    pub success: bool,
    /// Outputs of every node that succeeded, keyed by node id
    pub outputs: HashMap<NodeId, HashMap<String, Value>>,
    /// Workflow variables at the end of the run
    pub variables: HashMap<String, Value>,
    /// First node failure, if any
    pub error: Option<NodeExecutionError>,
    /// Every node of the graph, in declaration order
    pub node_outcomes: Vec<NodeOutcome>,
    /// Nodes that started, in the order they started
    pub execution_order: Vec<NodeId>,
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub duration_ms: u64,
    pub cleanup: CleanupReport,
    pub warnings: Vec<String>,
}

impl ExecutionResult {
    fn from_state(
        state: &ExecutionState,
        error: Option<NodeExecutionError>,
        cleanup: CleanupReport,
        duration_ms: u64,
    ) -> Self {
        let node_outcomes: Vec<NodeOutcome> = state
            .node_statuses()
            .map(|(id, status)| NodeOutcome {
                node_id: id.clone(),
                status,
                error: state.node_error(id).map(str::to_string),
            })
            .collect();
        let completed_nodes = node_outcomes
            .iter()
            .filter(|o| o.status == NodeStatus::Succeeded)
            .count();

        Self {
            execution_id: state.run_id(),
            workflow_name: state.workflow_name().to_string(),
            status: state.status(),
            success: state.status() == RunStatus::Completed,
            outputs: state.scope().node_outputs().clone(),
            variables: state.variables().clone(),
            error,
            node_outcomes,
            execution_order: state.execution_order().to_vec(),
            completed_nodes,
            total_nodes: state.required_total(),
            duration_ms,
            cleanup,
            warnings: state.warnings().to_vec(),
        }
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_outcomes
            .iter()
            .find(|o| o.node_id == node_id)
            .map(|o| o.status)
    }

    /// Ids of nodes that ended with `status`, in declaration order
    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<&str> {
        self.node_outcomes
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.node_id.as_str())
            .collect()
    }

    pub fn output(&self, node_id: &str, name: &str) -> Option<&Value> {
        self.outputs.get(node_id).and_then(|o| o.get(name))
    }
}
