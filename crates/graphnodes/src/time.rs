use async_trait::async_trait;
use graphcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use graphruntime::{NodeFactory, NodeMetadata, PortDefinition};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = match ctx.parameters.get("delay_ms") {
            None => 1000,
            Some(v) => v.as_f64().filter(|ms| *ms >= 0.0).ok_or_else(|| {
                NodeError::Configuration(format!(
                    "delay_ms must be a non-negative number, got {}",
                    v
                ))
            })? as u64,
        };

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        // a stop request cuts the wait short
        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        // Pass through any inputs
        let mut output = NodeOutput::new();
        output.outputs = ctx.inputs.clone();
        Ok(output)
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DelayNode))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![PortDefinition::new("delay_ms", "Milliseconds to wait (default 1000)")],
            outputs: vec![],
        }
    }
}
