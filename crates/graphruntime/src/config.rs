use graphcore::{FlowError, NodeId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of the broadcast event bus
    pub event_buffer_size: usize,
    /// Upper bound for end-of-run cleanup
    pub cleanup_timeout_ms: u64,
    /// Per-node execution limit; unlimited when absent
    pub node_timeout_ms: Option<u64>,
    pub continue_on_error: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            cleanup_timeout_ms: 5_000,
            node_timeout_ms: None,
            continue_on_error: false,
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&raw)?;
        tracing::debug!("Loaded runtime config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            cleanup_timeout: Duration::from_millis(self.cleanup_timeout_ms),
            node_timeout: self.node_timeout_ms.map(Duration::from_millis),
            continue_on_error: self.continue_on_error,
            target_node_id: None,
            cancellation: None,
        }
    }
}

/// Per-run options for `ExecuteWorkflowUseCase::execute`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cleanup_timeout: Duration,
    pub node_timeout: Option<Duration>,
    pub continue_on_error: bool,
    /// Run-to-node: only the target and what it depends on execute
    pub target_node_id: Option<NodeId>,
    /// Extra stop signal for this run only
    pub cancellation: Option<CancellationToken>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RuntimeConfig::default().run_options()
    }
}

impl RunOptions {
    pub fn with_target(mut self, node_id: impl Into<NodeId>) -> Self {
        self.target_node_id = Some(node_id.into());
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

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}
