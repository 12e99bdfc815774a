use crate::resolver::{VariableResolver, VariableScope};
use chrono::{DateTime, Utc};
use graphcore::{
    ExecutionId, Node, NodeId, NodeStatus, ResourceScope, RunStatus, Value, ValueResolver,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Read-only view of a run's variables handed to a node
#[derive(Clone)]
pub struct ScopeSnapshot {
    scope: Arc<VariableScope>,
    resolver: VariableResolver,
}

impl ValueResolver for ScopeSnapshot {
    fn resolve(&self, value: &Value) -> Value {
        self.resolver.resolve_deep(value, &self.scope)
    }
}

/// What cleanup managed to do
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub released: usize,
    pub failures: Vec<String>,
    pub timed_out: bool,
}

/// Per-run mutable record. Owned by exactly one run.
pub struct ExecutionState {
    run_id: ExecutionId,
    workflow_name: Arc<str>,
    scope: Arc<VariableScope>,
    resolver: VariableResolver,
    status: RunStatus,
    current_node: Option<NodeId>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    stop: CancellationToken,
    continue_on_error: bool,
    cleanup_timeout: Duration,
    node_order: Vec<NodeId>,
    node_statuses: HashMap<NodeId, NodeStatus>,
    node_errors: HashMap<NodeId, String>,
    execution_order: Vec<NodeId>,
    required_total: usize,
    resources: ResourceScope,
    cleaned_up: bool,
    warnings: Vec<String>,
}

impl ExecutionState {
    /// Build state for a run. `overrides` win over `defaults` on key collision.
    pub fn new(
        workflow_name: impl Into<Arc<str>>,
        node_ids: impl IntoIterator<Item = NodeId>,
        defaults: &HashMap<String, Value>,
        overrides: HashMap<String, Value>,
    ) -> Self {
        let mut variables = defaults.clone();
        variables.extend(overrides);

        let node_order: Vec<NodeId> = node_ids.into_iter().collect();
        let node_statuses = node_order
            .iter()
            .map(|id| (id.clone(), NodeStatus::Pending))
            .collect();

        Self {
            run_id: ExecutionId::new_v4(),
            workflow_name: workflow_name.into(),
            scope: Arc::new(VariableScope::new(variables)),
            resolver: VariableResolver::new(),
            status: RunStatus::NotStarted,
            current_node: None,
            started_at: None,
            finished_at: None,
            stop: CancellationToken::new(),
            continue_on_error: false,
            required_total: node_order.len(),
            node_order,
            node_statuses,
            node_errors: HashMap::new(),
            execution_order: Vec::new(),
            resources: ResourceScope::new(),
            cleanup_timeout: Duration::from_secs(5),
            cleaned_up: false,
            warnings: Vec::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: VariableResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    pub fn run_id(&self) -> ExecutionId {
        self.run_id
    }

    pub fn workflow_name(&self) -> &Arc<str> {
        &self.workflow_name
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn current_node(&self) -> Option<&str> {
        self.current_node.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    pub fn cleanup_timeout(&self) -> Duration {
        self.cleanup_timeout
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn resources(&self) -> &ResourceScope {
        &self.resources
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn scope(&self) -> &VariableScope {
        &self.scope
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        self.scope.variables()
    }

    /// Resolve a value against the current variables. Never mutates state.
    pub fn resolve_value(&self, value: &Value) -> Value {
        self.resolver.resolve(value, &self.scope)
    }

    /// Snapshot for a node context; copy-on-write against later mutation
    pub fn snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot {
            scope: Arc::clone(&self.scope),
            resolver: self.resolver.clone(),
        }
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.scope).set_variable(key, value);
    }

    pub fn merge_node_output(&mut self, node_id: &str, outputs: HashMap<String, Value>) {
        Arc::make_mut(&mut self.scope).merge_node_output(node_id, outputs);
    }

    /// Move the run to `next`. Returns false (and changes nothing) for illegal moves.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!("Ignoring run transition {} -> {}", self.status, next);
            return false;
        }
        self.status = next;
        match next {
            RunStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => {
                self.finished_at = Some(Utc::now());
                self.current_node = None;
            }
            _ => {}
        }
        true
    }

    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.node_statuses.get(node_id).copied().unwrap_or_default()
    }

    /// Node ids with their status, in graph declaration order
    pub fn node_statuses(&self) -> impl Iterator<Item = (&NodeId, NodeStatus)> {
        self.node_order
            .iter()
            .map(move |id| (id, self.node_status(id)))
    }

    pub fn node_error(&self, node_id: &str) -> Option<&str> {
        self.node_errors.get(node_id).map(String::as_str)
    }

    pub fn has_failed(&self, node_id: &str) -> bool {
        self.node_status(node_id) == NodeStatus::Failed
    }

    pub fn mark_running(&mut self, node_id: &str) -> bool {
        if !self.set_node_status(node_id, NodeStatus::Running) {
            return false;
        }
        self.current_node = Some(node_id.to_string());
        self.execution_order.push(node_id.to_string());
        true
    }

    pub fn mark_succeeded(&mut self, node_id: &str) -> bool {
        self.set_node_status(node_id, NodeStatus::Succeeded)
    }

    pub fn mark_failed(&mut self, node_id: &str, message: impl Into<String>) -> bool {
        self.node_errors.insert(node_id.to_string(), message.into());
        self.set_node_status(node_id, NodeStatus::Failed)
    }

    pub fn mark_skipped(&mut self, node_id: &str) -> bool {
        self.set_node_status(node_id, NodeStatus::Skipped)
    }

    /// Mark every node that never left Pending as Skipped
    pub fn skip_unvisited(&mut self) -> Vec<NodeId> {
        let pending: Vec<NodeId> = self
            .node_order
            .iter()
            .filter(|id| self.node_status(id) == NodeStatus::Pending)
            .cloned()
            .collect();
        for id in &pending {
            self.set_node_status(id, NodeStatus::Skipped);
        }
        pending
    }

    fn set_node_status(&mut self, node_id: &str, next: NodeStatus) -> bool {
        let Some(current) = self.node_statuses.get_mut(node_id) else {
            tracing::warn!("Status change for unknown node {}", node_id);
            return false;
        };
        if !current.can_transition_to(next) {
            tracing::warn!("Ignoring node {} transition {} -> {}", node_id, current, next);
            return false;
        }
        *current = next;
        true
    }

    /// Nodes that started, in the order they started
    pub fn execution_order(&self) -> &[NodeId] {
        &self.execution_order
    }

    pub fn set_required_total(&mut self, total: usize) {
        self.required_total = total;
    }

    pub fn required_total(&self) -> usize {
        self.required_total
    }

    /// visited / required, in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.required_total == 0 {
            return 1.0;
        }
        (self.execution_order.len() as f64 / self.required_total as f64).min(1.0)
    }

    /// Release scoped resources and shut down node instances, bounded by `timeout`.
    ///
    /// Runs at most once; later calls return an empty report. A timeout or a
    /// failing release is recorded as a warning and never changes the run status.
    pub async fn cleanup(
        &mut self,
        timeout: Duration,
        nodes: &mut HashMap<NodeId, Box<dyn Node>>,
    ) -> CleanupReport {
        if self.cleaned_up {
            return CleanupReport::default();
        }
        self.cleaned_up = true;

        let resources = self.resources.clone();
        let release = async {
            let mut released = 0;
            let mut failures = Vec::new();
            for resource in resources.drain().await {
                let name = resource.name().to_string();
                match resource.release().await {
                    Ok(()) => released += 1,
                    Err(e) => failures.push(format!("resource {}: {}", name, e)),
                }
            }
            for (node_id, node) in nodes.iter_mut() {
                if let Err(e) = node.shutdown().await {
                    failures.push(format!("node {}: {}", node_id, e));
                }
            }
            (released, failures)
        };

        match tokio::time::timeout(timeout, release).await {
            Ok((released, failures)) => {
                for failure in &failures {
                    tracing::warn!("Cleanup failure in run {}: {}", self.run_id, failure);
                    self.warnings.push(format!("cleanup failed: {}", failure));
                }
                tracing::debug!("Cleanup released {} resources", released);
                CleanupReport {
                    released,
                    failures,
                    timed_out: false,
                }
            }
            Err(_) => {
                tracing::warn!(
                    "Cleanup of run {} abandoned after {}ms",
                    self.run_id,
                    timeout.as_millis()
                );
                self.warnings
                    .push(format!("cleanup timed out after {}ms", timeout.as_millis()));
                CleanupReport {
                    released: 0,
                    failures: Vec::new(),
                    timed_out: true,
                }
            }
        }
    }
}
