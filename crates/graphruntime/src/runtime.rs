use crate::{ExecuteWorkflowUseCase, ExecutionResult, NodeRegistry, RunOptions, RuntimeConfig};
use graphcore::{EventBus, ExecutionEvent, FlowError, Value, WorkflowGraph};
use std::collections::HashMap;
use std::sync::Arc;

/// Main runtime: a node registry, an event bus and the use case wired together
pub struct GraphRuntime {
    use_case: ExecuteWorkflowUseCase,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl GraphRuntime {
    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let use_case = ExecuteWorkflowUseCase::new(registry).with_event_sink(event_bus.clone());

        Self {
            use_case,
            event_bus,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.use_case.registry()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Options derived from the runtime configuration
    pub fn default_options(&self) -> RunOptions {
        self.config.run_options()
    }

    /// Execute with the configured defaults
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        self.use_case
            .execute(graph, inputs, self.default_options())
            .await
    }

    pub async fn execute_with(
        &self,
        graph: &WorkflowGraph,
        inputs: HashMap<String, Value>,
        options: RunOptions,
    ) -> Result<ExecutionResult, FlowError> {
        self.use_case.execute(graph, inputs, options).await
    }

    pub fn stop(&self) {
        self.use_case.stop();
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }
}
