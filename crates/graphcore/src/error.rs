use crate::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by a node's own execute capability
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Structural problems with a graph. Raised before any node runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Workflow has no start node")]
    NoStartNode,

    #[error("Workflow has more than one start node: {}", .0.join(", "))]
    AmbiguousStart(Vec<NodeId>),

    #[error("Target node not found in graph: {0}")]
    UnreachableTarget(NodeId),

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Port kind mismatch: {source_port} ({source_kind}) -> {target_port} ({target_kind})")]
    PortKindMismatch {
        source_port: String,
        source_kind: String,
        target_port: String,
        target_kind: String,
    },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Node {node_id} could not be created: {message}")]
    InvalidNode { node_id: NodeId, message: String },
}

/// A node's failure as recorded in the run result
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[error("Node {node_id} failed: {message}")]
pub struct NodeExecutionError {
    pub node_id: NodeId,
    pub message: String,
}

impl NodeExecutionError {
    pub fn new(node_id: impl Into<NodeId>, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            message: message.into(),
        }
    }
}
