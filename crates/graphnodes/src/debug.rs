use async_trait::async_trait;
use graphcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use graphruntime::{NodeFactory, NodeMetadata, PortDefinition};
use std::collections::HashMap;

/// Writes a message to the event stream and the log
pub struct LogNode;

#[async_trait]
impl Node for LogNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let message = ctx
            .input_or_parameter("message")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(no message)".to_string());
        let level = ctx
            .parameters
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or("info");

        if level == "warn" {
            tracing::warn!("[{}] {}", ctx.node_id, message);
            ctx.events.warn(message.clone());
        } else {
            tracing::info!("[{}] {}", ctx.node_id, message);
            ctx.events.info(message.clone());
        }

        // Also log data inputs for visibility
        for (key, value) in &ctx.inputs {
            ctx.events.info(format!("  {}: {}", key, value));
        }

        Ok(NodeOutput::new().with_output("message", message))
    }
}

pub struct LogNodeFactory;

impl NodeFactory for LogNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(LogNode))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs a message for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![
                PortDefinition::new("message", "Text to log, templates allowed"),
                PortDefinition::new("level", "`info` (default) or `warn`"),
            ],
            outputs: vec![PortDefinition::new("message", "The logged text")],
        }
    }
}
