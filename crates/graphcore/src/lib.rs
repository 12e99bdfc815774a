//! Core abstractions for the graph execution engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: values, the workflow graph, the node capability,
//! run statuses and lifecycle events.

mod error;
pub mod events;
mod graph;
mod node;
mod resources;
mod status;
mod value;

pub use error::{FlowError, GraphError, NodeError, NodeExecutionError};
pub use events::*;
pub use graph::{
    node_types, Connection, NodeId, NodeInstance, PortKind, PortRef, Position, WorkflowGraph,
    WorkflowId,
};
pub use node::{IdentityResolver, Node, NodeContext, NodeMetadata, NodeOutput, ValueResolver};
pub use resources::{ResourceScope, ScopedResource};
pub use status::{NodeStatus, RunStatus};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
