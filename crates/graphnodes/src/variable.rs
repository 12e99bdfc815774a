use async_trait::async_trait;
use graphcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use graphruntime::{NodeFactory, NodeMetadata, PortDefinition};
use std::collections::HashMap;

/// Assigns a workflow variable visible to every later node
pub struct SetVariableNode;

#[async_trait]
impl Node for SetVariableNode {
    fn node_type(&self) -> &str {
        "variable.set"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let name = ctx.require_parameter("name")?;
        let name = match name.as_str() {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => {
                return Err(NodeError::InvalidInputType {
                    field: "name".to_string(),
                    expected: "non-empty string".to_string(),
                    actual: name.type_name().to_string(),
                })
            }
        };
        let value = ctx.input_or_parameter("value").cloned().unwrap_or(Value::Null);

        ctx.events.info(format!("{} = {}", name, value));
        Ok(NodeOutput::new()
            .with_output("value", value.clone())
            .with_variable(name, value))
    }
}

pub struct SetVariableNodeFactory;

impl NodeFactory for SetVariableNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        if !parameters.contains_key("name") {
            return Err(NodeError::Configuration("variable.set needs a `name`".to_string()));
        }
        Ok(Box::new(SetVariableNode))
    }

    fn node_type(&self) -> &str {
        "variable.set"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Sets a workflow variable".to_string(),
            category: "variable".to_string(),
            inputs: vec![
                PortDefinition::new("name", "Variable name").required(),
                PortDefinition::new("value", "New value, templates allowed"),
            ],
            outputs: vec![PortDefinition::new("value", "The assigned value")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_assignment() {
        let ctx = NodeContext::new("set")
            .with_parameter("name", " counter ")
            .with_parameter("value", 4);
        let out = SetVariableNode.execute(ctx).await.unwrap();
        assert_eq!(out.variables.get("counter"), Some(&Value::from(4)));
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let ctx = NodeContext::new("set").with_parameter("name", "  ");
        assert!(SetVariableNode.execute(ctx).await.is_err());
    }

    #[test]
    fn factory_requires_name() {
        assert!(SetVariableNodeFactory.create(&HashMap::new()).is_err());
    }
}
