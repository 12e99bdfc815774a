//! Workflow execution runtime
//!
//! Resolves templated parameters, analyses the graph, keeps per-run state and
//! walks the graph one node at a time.

mod config;
mod executor;
mod orchestrator;
mod registry;
mod resolver;
mod runtime;
mod state;

pub use config::{RunOptions, RuntimeConfig};
pub use executor::{ExecuteWorkflowUseCase, ExecutionResult, NodeOutcome};
pub use orchestrator::{ControlFlowKind, ExecutionOrchestrator, CATCH_PORT, TRY_PORT};
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry, PortDefinition};
pub use resolver::{VariableResolver, VariableScope};
pub use runtime::GraphRuntime;
pub use state::{CleanupReport, ExecutionState, ScopeSnapshot};
