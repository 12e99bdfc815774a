use crate::{NodeId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle event kinds, in the order a run can emit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    WorkflowStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    /// Free-form message a node sends while it runs
    NodeMessage,
    WorkflowError,
    WorkflowStopped,
    WorkflowCompleted,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventKind::WorkflowError | EventKind::WorkflowStopped | EventKind::WorkflowCompleted
        )
    }
}

/// Event emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub kind: EventKind,
    pub execution_id: ExecutionId,
    pub workflow_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: HashMap<String, Value>,
}

impl ExecutionEvent {
    pub fn new(
        kind: EventKind,
        execution_id: ExecutionId,
        workflow_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            execution_id,
            workflow_name: workflow_name.into(),
            timestamp: Utc::now(),
            payload: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn node_id(&self) -> Option<&str> {
        self.payload.get("node_id").and_then(Value::as_str)
    }
}

/// Subscriber for lifecycle events.
///
/// `emit` must not block: the engine calls it inline between nodes.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecutionEvent);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: ExecutionEvent) {}
}

/// Broadcast event bus. Lagging receivers miss events instead of stalling the run.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: ExecutionEvent) {
        // no receivers is fine
        let _ = self.sender.send(event);
    }
}

/// Handle given to a node so it can report messages while it runs
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    workflow_name: Arc<str>,
    node_id: NodeId,
    sink: Arc<dyn EventSink>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        workflow_name: Arc<str>,
        node_id: NodeId,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            execution_id,
            workflow_name,
            node_id,
            sink,
        }
    }

    /// Emitter wired to nothing, handy for calling nodes directly
    pub fn detached(node_id: impl Into<NodeId>) -> Self {
        Self::new(Uuid::nil(), Arc::from(""), node_id.into(), Arc::new(NoopSink))
    }

    fn message(&self, level: &str, message: String) {
        self.sink.emit(
            ExecutionEvent::new(EventKind::NodeMessage, self.execution_id, &*self.workflow_name)
                .with("node_id", self.node_id.clone())
                .with("level", level)
                .with("message", message),
        );
    }

    pub fn info(&self, message: impl Into<String>) {
        self.message("info", message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.message("warn", message.into());
    }

    /// Emit progress update (0-100)
    pub fn progress(&self, percent: f64, message: Option<String>) {
        let mut event =
            ExecutionEvent::new(EventKind::NodeMessage, self.execution_id, &*self.workflow_name)
                .with("node_id", self.node_id.clone())
                .with("level", "progress")
                .with("percent", percent);
        if let Some(message) = message {
            event = event.with("message", message);
        }
        self.sink.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_delivers_in_emission_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.emit(ExecutionEvent::new(EventKind::WorkflowStarted, id, "wf"));
        bus.emit(ExecutionEvent::new(EventKind::WorkflowCompleted, id, "wf"));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::WorkflowStarted);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::WorkflowCompleted);
    }

    #[test]
    fn emit_without_subscribers_does_not_fail() {
        let bus = EventBus::new(1);
        for _ in 0..4 {
            bus.emit(ExecutionEvent::new(EventKind::NodeStarted, Uuid::nil(), "wf"));
        }
    }

    #[test]
    fn kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&EventKind::WorkflowStarted).unwrap();
        assert_eq!(json, "\"WORKFLOW_STARTED\"");
    }
}
