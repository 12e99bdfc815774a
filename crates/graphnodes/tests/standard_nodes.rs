use graphcore::{node_types, EventKind, NodeInstance, NodeStatus, RunStatus, Value, WorkflowGraph};
use graphnodes::standard_registry;
use graphruntime::{GraphRuntime, RuntimeConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> GraphRuntime {
    GraphRuntime::with_registry(Arc::new(standard_registry()), RuntimeConfig::default())
}

#[test]
fn registry_lists_every_standard_node() {
    let registry = standard_registry();
    for node_type in [
        node_types::START,
        node_types::END,
        node_types::IF,
        node_types::SWITCH,
        node_types::LOOP,
        node_types::TRY_CATCH,
        "variable.set",
        "debug.log",
        "time.delay",
    ] {
        assert!(registry.contains(node_type), "{} missing", node_type);
    }
}

#[tokio::test]
async fn switch_routes_by_variable() {
    let mut g = WorkflowGraph::new("switch");
    g.add_node(NodeInstance::new("start", node_types::START));
    g.add_node(
        NodeInstance::new("sw", node_types::SWITCH)
            .with_parameter("value", "{{color}}")
            .with_parameter("cases", Value::List(vec!["red".into(), "green".into()])),
    );
    g.add_node(NodeInstance::new("red", "debug.log").with_parameter("message", "stop"));
    g.add_node(NodeInstance::new("green", "debug.log").with_parameter("message", "go"));
    g.add_node(NodeInstance::new("other", "debug.log").with_parameter("message", "?"));
    g.connect("start", "exec_out", "sw", "exec_in");
    g.connect("sw", "red", "red", "exec_in");
    g.connect("sw", "green", "green", "exec_in");
    g.connect("sw", "default", "other", "exec_in");

    let inputs = HashMap::from([("color".to_string(), Value::from("green"))]);
    let result = runtime().execute(&g, inputs).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.execution_order, vec!["start", "sw", "green"]);
    assert_eq!(result.status_of("red"), Some(NodeStatus::Skipped));
    assert_eq!(result.status_of("other"), Some(NodeStatus::Skipped));
}

#[tokio::test]
async fn set_variable_feeds_later_branch() {
    let mut g = WorkflowGraph::new("variables").with_variable("threshold", 10);
    g.add_node(NodeInstance::new("start", node_types::START));
    g.add_node(
        NodeInstance::new("set", "variable.set")
            .with_parameter("name", "ready")
            .with_parameter("value", true),
    );
    g.add_node(NodeInstance::new("if", node_types::IF).with_parameter("condition", "{{ready}}"));
    g.add_node(
        NodeInstance::new("log", "debug.log").with_parameter("message", "threshold {{threshold}}"),
    );
    g.add_node(
        NodeInstance::new("end", node_types::END).with_parameter("result", "{{log.message}}"),
    );
    g.connect("start", "exec_out", "set", "exec_in");
    g.connect("set", "exec_out", "if", "exec_in");
    g.connect("if", "true", "log", "exec_in");
    g.connect("log", "exec_out", "end", "exec_in");

    let result = runtime().execute(&g, HashMap::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.variables.get("ready"), Some(&Value::Bool(true)));
    assert_eq!(result.output("end", "result"), Some(&Value::from("threshold 10")));
}

#[tokio::test]
async fn loop_over_empty_list_completes() {
    let mut g = WorkflowGraph::new("loop");
    g.add_node(NodeInstance::new("start", node_types::START));
    g.add_node(NodeInstance::new("loop", node_types::LOOP).with_parameter("items", "{{rows}}"));
    g.add_node(NodeInstance::new("body", "debug.log").with_parameter("message", "{{loop.item}}"));
    g.add_node(NodeInstance::new("done", node_types::END));
    g.connect("start", "exec_out", "loop", "exec_in");
    g.connect("loop", "body", "body", "exec_in");
    g.connect("loop", "completed", "done", "exec_in");

    let inputs = HashMap::from([("rows".to_string(), Value::List(vec![]))]);
    let result = runtime().execute(&g, inputs).await.unwrap();

    assert_eq!(result.execution_order, vec!["start", "loop", "done"]);
    assert_eq!(result.status_of("body"), Some(NodeStatus::Skipped));
}

#[tokio::test]
async fn stop_during_delay_ends_stopped() {
    let mut g = WorkflowGraph::new("slow");
    g.add_node(NodeInstance::new("start", node_types::START));
    g.add_node(NodeInstance::new("wait", "time.delay").with_parameter("delay_ms", 10_000));
    g.add_node(NodeInstance::new("after", "debug.log"));
    g.connect("start", "exec_out", "wait", "exec_in");
    g.connect("wait", "exec_out", "after", "exec_in");

    let runtime = runtime();
    let mut events = runtime.subscribe_events();
    let (result, _) = tokio::join!(runtime.execute(&g, HashMap::new()), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        runtime.stop();
    });
    let result = result.unwrap();

    assert_eq!(result.status, RunStatus::Stopped);
    assert_eq!(result.status_of("after"), Some(NodeStatus::Skipped));

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(kinds.last(), Some(&EventKind::WorkflowStopped));
    assert!(!kinds.contains(&EventKind::WorkflowError));
}
