use crate::{events::EventEmitter, NodeError, NodeId, ResourceScope, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "control.if", "debug.log")
    fn node_type(&self) -> &str;

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Initialize stateful resources (DB connections, etc.)
    async fn initialize(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Cleanup resources. Called once per run during cleanup.
    async fn shutdown(&mut self) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Resolves `{{...}}` templates against the variables visible to a node
pub trait ValueResolver: Send + Sync {
    fn resolve(&self, value: &Value) -> Value;
}

/// Resolver that returns values untouched
pub struct IdentityResolver;

impl ValueResolver for IdentityResolver {
    fn resolve(&self, value: &Value) -> Value {
        value.clone()
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    /// Node parameters with templates already resolved
    pub parameters: HashMap<String, Value>,

    /// Values delivered over data connections, keyed by target port
    pub inputs: HashMap<String, Value>,

    /// Resources registered here are released during run cleanup
    pub resources: ResourceScope,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the run is asked to stop
    pub cancellation: CancellationToken,

    /// Snapshot of the run's variables taken before this node started
    pub variables: Arc<dyn ValueResolver>,
}

impl NodeContext {
    /// Context with no inputs and no run attached
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        let node_id = node_id.into();
        Self {
            events: EventEmitter::detached(node_id.clone()),
            node_id,
            parameters: HashMap::new(),
            inputs: HashMap::new(),
            resources: ResourceScope::new(),
            cancellation: CancellationToken::new(),
            variables: Arc::new(IdentityResolver),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Resolve a nested value the engine did not resolve up front
    pub fn resolve(&self, value: &Value) -> Value {
        self.variables.resolve(value)
    }

    /// Get required parameter or return error
    pub fn require_parameter(&self, name: &str) -> Result<&Value, NodeError> {
        self.parameters
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing parameter: {}", name)))
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Data input first, then parameter
    pub fn input_or_parameter(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).or_else(|| self.parameters.get(name))
    }

    /// Get parameter with default
    pub fn parameter_or(&self, name: &str, default: Value) -> Value {
        self.parameters.get(name).cloned().unwrap_or(default)
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values, stored under the node's namespace
    pub outputs: HashMap<String, Value>,

    /// Exec port a control-flow node selected
    pub branch: Option<String>,

    /// Workflow variables to assign once the node has completed
    pub variables: HashMap<String, Value>,

    /// Execution metadata
    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub custom: HashMap<String, Value>,
}
