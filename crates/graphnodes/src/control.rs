//! Control-flow nodes.
//!
//! Branching nodes never do work of their own: they evaluate an already
//! resolved parameter and name the exec output port the walk should follow.

use async_trait::async_trait;
use graphcore::{node_types, Node, NodeContext, NodeError, NodeOutput, Value};
use graphruntime::{NodeFactory, NodeMetadata, PortDefinition, CATCH_PORT, TRY_PORT};
use std::collections::HashMap;

/// Entry point of every workflow
pub struct StartNode;

#[async_trait]
impl Node for StartNode {
    fn node_type(&self) -> &str {
        node_types::START
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.events.info("Workflow entered");
        Ok(NodeOutput::new())
    }
}

pub struct StartNodeFactory;

impl NodeFactory for StartNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(StartNode))
    }

    fn node_type(&self) -> &str {
        node_types::START
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Entry point of the workflow".to_string(),
            category: "control".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::new("exec_out", "Continues the walk")],
        }
    }
}

/// Marks the end of a path; passes its `result` parameter through
pub struct EndNode;

#[async_trait]
impl Node for EndNode {
    fn node_type(&self) -> &str {
        node_types::END
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut output = NodeOutput::new();
        if let Some(result) = ctx.input_or_parameter("result") {
            output = output.with_output("result", result.clone());
        }
        Ok(output)
    }
}

pub struct EndNodeFactory;

impl NodeFactory for EndNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(EndNode))
    }

    fn node_type(&self) -> &str {
        node_types::END
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "End of a workflow path".to_string(),
            category: "control".to_string(),
            inputs: vec![PortDefinition::new("result", "Optional final value")],
            outputs: vec![],
        }
    }
}

/// Two-way branch on the truthiness of `condition`
pub struct IfNode;

#[async_trait]
impl Node for IfNode {
    fn node_type(&self) -> &str {
        node_types::IF
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let condition = ctx
            .input_or_parameter("condition")
            .ok_or_else(|| NodeError::MissingInput("condition".to_string()))?;
        let taken = condition.is_truthy();
        let branch = if taken { "true" } else { "false" };
        ctx.events.info(format!("Condition {} -> {}", condition, branch));

        Ok(NodeOutput::new()
            .with_output("result", taken)
            .with_branch(branch))
    }
}

pub struct IfNodeFactory;

impl NodeFactory for IfNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(IfNode))
    }

    fn node_type(&self) -> &str {
        node_types::IF
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Follows `true` or `false` depending on a condition".to_string(),
            category: "control".to_string(),
            inputs: vec![
                PortDefinition::new("condition", "Value tested for truthiness").required(),
            ],
            outputs: vec![
                PortDefinition::new("true", "Taken when the condition holds"),
                PortDefinition::new("false", "Taken otherwise"),
            ],
        }
    }
}

/// Multi-way branch: follows the port named after the first case equal to `value`
pub struct SwitchNode;

impl SwitchNode {
    fn select(value: &Value, cases: &[Value]) -> String {
        cases
            .iter()
            .find(|case| *case == value || case.to_string() == value.to_string())
            .map(|case| case.to_string())
            .unwrap_or_else(|| "default".to_string())
    }
}

#[async_trait]
impl Node for SwitchNode {
    fn node_type(&self) -> &str {
        node_types::SWITCH
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx
            .input_or_parameter("value")
            .ok_or_else(|| NodeError::MissingInput("value".to_string()))?;
        let cases = match ctx.parameters.get("cases") {
            None => &[][..],
            Some(cases) => cases.as_list().ok_or_else(|| NodeError::InvalidInputType {
                field: "cases".to_string(),
                expected: "list".to_string(),
                actual: cases.type_name().to_string(),
            })?,
        };

        let branch = Self::select(value, cases);
        ctx.events.info(format!("Switch on {} -> {}", value, branch));
        Ok(NodeOutput::new()
            .with_output("value", value.clone())
            .with_branch(branch))
    }
}

pub struct SwitchNodeFactory;

impl NodeFactory for SwitchNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(SwitchNode))
    }

    fn node_type(&self) -> &str {
        node_types::SWITCH
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Follows the port named after the matching case, or `default`".to_string(),
            category: "control".to_string(),
            inputs: vec![
                PortDefinition::new("value", "Value to match").required(),
                PortDefinition::new("cases", "List of case values"),
            ],
            outputs: vec![PortDefinition::new("default", "Taken when no case matches")],
        }
    }
}

/// Largest numeric `items` count a loop expands into a list
pub const MAX_LOOP_COUNT: usize = 100_000;

/// Exposes `items` to its body once.
///
/// Each node runs at most once per run, so the body is entered a single time
/// with the whole list; an empty list goes straight to `completed`.
pub struct LoopNode;

#[async_trait]
impl Node for LoopNode {
    fn node_type(&self) -> &str {
        node_types::LOOP
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items: Vec<Value> = match ctx.input_or_parameter("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::List(items)) => items.clone(),
            Some(Value::Number(n)) => (0..loop_count(*n)?).map(Value::from).collect(),
            Some(other) => {
                return Err(NodeError::InvalidInputType {
                    field: "items".to_string(),
                    expected: "list or count".to_string(),
                    actual: other.type_name().to_string(),
                })
            }
        };

        let count = items.len();
        let branch = if count == 0 { "completed" } else { "body" };
        let mut output = NodeOutput::new()
            .with_output("count", count)
            .with_branch(branch);
        if let Some(first) = items.first() {
            output = output.with_output("item", first.clone()).with_output("index", 0);
        }
        Ok(output.with_output("items", items))
    }
}

/// Finite, non-negative whole numbers up to `MAX_LOOP_COUNT`
fn loop_count(n: f64) -> Result<usize, NodeError> {
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= MAX_LOOP_COUNT as f64 {
        return Ok(n as usize);
    }
    Err(NodeError::InvalidInputType {
        field: "items".to_string(),
        expected: format!("whole count between 0 and {}", MAX_LOOP_COUNT),
        actual: n.to_string(),
    })
}

pub struct LoopNodeFactory;

impl NodeFactory for LoopNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(LoopNode))
    }

    fn node_type(&self) -> &str {
        node_types::LOOP
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Routes to `body` for a non-empty list, `completed` otherwise".to_string(),
            category: "control".to_string(),
            inputs: vec![PortDefinition::new("items", "List or item count")],
            outputs: vec![
                PortDefinition::new("body", "Entered with the items"),
                PortDefinition::new("completed", "Taken for an empty list"),
            ],
        }
    }
}

/// Routes into its `try` port.
///
/// When a node reachable from `try` fails, the run continues with the nodes on
/// the `catch` port instead, and this node's `error` and `failed_node` outputs
/// describe the failure.
pub struct TryCatchNode;

#[async_trait]
impl Node for TryCatchNode {
    fn node_type(&self) -> &str {
        node_types::TRY_CATCH
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new().with_branch(TRY_PORT))
    }
}

pub struct TryCatchNodeFactory;

impl NodeFactory for TryCatchNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(TryCatchNode))
    }

    fn node_type(&self) -> &str {
        node_types::TRY_CATCH
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Runs the `try` path; a failure there continues on `catch`".to_string(),
            category: "control".to_string(),
            inputs: vec![],
            outputs: vec![
                PortDefinition::new(TRY_PORT, "Guarded path"),
                PortDefinition::new(CATCH_PORT, "Taken after a failure on the guarded path"),
                PortDefinition::new("error", "Message of the caught failure"),
                PortDefinition::new("failed_node", "Id of the node that failed"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn if_picks_branch_from_truthiness() {
        let yes = IfNode
            .execute(NodeContext::new("if").with_parameter("condition", "yes"))
            .await
            .unwrap();
        assert_eq!(yes.branch.as_deref(), Some("true"));

        let no = IfNode
            .execute(NodeContext::new("if").with_parameter("condition", 0))
            .await
            .unwrap();
        assert_eq!(no.branch.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn if_without_condition_fails() {
        let err = IfNode.execute(NodeContext::new("if")).await.unwrap_err();
        assert!(matches!(err, NodeError::MissingInput(_)));
    }

    #[tokio::test]
    async fn switch_matches_case_or_default() {
        let cases = Value::List(vec!["red".into(), "green".into(), Value::from(3)]);
        let ctx = NodeContext::new("sw")
            .with_parameter("value", "green")
            .with_parameter("cases", cases.clone());
        let out = SwitchNode.execute(ctx).await.unwrap();
        assert_eq!(out.branch.as_deref(), Some("green"));

        let ctx = NodeContext::new("sw")
            .with_parameter("value", 3)
            .with_parameter("cases", cases.clone());
        assert_eq!(SwitchNode.execute(ctx).await.unwrap().branch.as_deref(), Some("3"));

        let ctx = NodeContext::new("sw")
            .with_parameter("value", "blue")
            .with_parameter("cases", cases);
        assert_eq!(SwitchNode.execute(ctx).await.unwrap().branch.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn loop_routes_on_emptiness() {
        let ctx = NodeContext::new("loop")
            .with_parameter("items", Value::List(vec!["a".into(), "b".into()]));
        let out = LoopNode.execute(ctx).await.unwrap();
        assert_eq!(out.branch.as_deref(), Some("body"));
        assert_eq!(out.outputs.get("count"), Some(&Value::from(2)));
        assert_eq!(out.outputs.get("item"), Some(&Value::from("a")));

        let out = LoopNode.execute(NodeContext::new("loop")).await.unwrap();
        assert_eq!(out.branch.as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn loop_expands_counts_within_cap() {
        let ctx = NodeContext::new("loop").with_parameter("items", 3);
        let out = LoopNode.execute(ctx).await.unwrap();
        assert_eq!(out.outputs.get("count"), Some(&Value::from(3)));

        for bad in [1e12, f64::INFINITY, f64::NAN, 2.5, -1.0, (MAX_LOOP_COUNT + 1) as f64] {
            let ctx = NodeContext::new("loop").with_parameter("items", bad);
            let err = LoopNode.execute(ctx).await.unwrap_err();
            assert!(matches!(err, NodeError::InvalidInputType { .. }), "{} accepted", bad);
        }
    }

    #[tokio::test]
    async fn loop_rejects_strings() {
        let ctx = NodeContext::new("loop").with_parameter("items", "abc");
        let err = LoopNode.execute(ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidInputType { .. }));
    }
}
