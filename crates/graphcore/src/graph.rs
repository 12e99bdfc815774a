use crate::{GraphError, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = String;

/// Reserved type tags understood by the engine itself
pub mod node_types {
    pub const START: &str = "control.start";
    pub const END: &str = "control.end";
    pub const IF: &str = "control.if";
    pub const SWITCH: &str = "control.switch";
    pub const LOOP: &str = "control.loop";
    pub const TRY_CATCH: &str = "control.try_catch";
}

/// Complete workflow definition. Read-only for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Default workflow variables, overridden by caller-supplied ones
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            variables: HashMap::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeInstance) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Connect two exec ports
    pub fn connect(
        &mut self,
        from_node: impl Into<NodeId>,
        from_port: impl Into<String>,
        to_node: impl Into<NodeId>,
        to_port: impl Into<String>,
    ) {
        self.connections.push(Connection {
            source: PortRef::exec(from_node, from_port),
            target: PortRef::exec(to_node, to_port),
        });
    }

    /// Connect two data ports
    pub fn connect_data(
        &mut self,
        from_node: impl Into<NodeId>,
        from_port: impl Into<String>,
        to_node: impl Into<NodeId>,
        to_port: impl Into<String>,
    ) {
        self.connections.push(Connection {
            source: PortRef::data(from_node, from_port),
            target: PortRef::data(to_node, to_port),
        });
    }

    /// Add an already-built connection
    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.find_node(id).is_some()
    }

    /// Exec connections in declaration order
    pub fn exec_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(|c| c.kind() == PortKind::Exec)
    }

    /// Data connections feeding the given node
    pub fn data_inputs_of<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.kind() == PortKind::Data && c.target.node == node_id)
    }

    /// Check structural invariants: unique ids, existing endpoints, matching port kinds
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
        }

        for conn in &self.connections {
            for endpoint in [&conn.source, &conn.target] {
                if !seen.contains(endpoint.node.as_str()) {
                    return Err(GraphError::NodeNotFound(endpoint.node.clone()));
                }
            }
            conn.check_kinds()?;
        }

        Ok(())
    }
}

/// Node placed in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: NodeId,
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Parameter literals or template strings, resolved at execution time
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub position: Option<Position>,
}

impl NodeInstance {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            parameters: HashMap::new(),
            position: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Exec,
    Data,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Exec => write!(f, "exec"),
            PortKind::Data => write!(f, "data"),
        }
    }
}

/// One end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: String,
    #[serde(default = "default_port_kind")]
    pub kind: PortKind,
}

fn default_port_kind() -> PortKind {
    PortKind::Exec
}

impl PortRef {
    pub fn exec(node: impl Into<NodeId>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
            kind: PortKind::Exec,
        }
    }

    pub fn data(node: impl Into<NodeId>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
            kind: PortKind::Data,
        }
    }
}

/// Directed connection between two ports of the same kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: PortRef,
    pub target: PortRef,
}

impl Connection {
    /// Build a connection, rejecting mismatched port kinds
    pub fn new(source: PortRef, target: PortRef) -> Result<Self, GraphError> {
        let conn = Self { source, target };
        conn.check_kinds()?;
        Ok(conn)
    }

    pub fn kind(&self) -> PortKind {
        self.source.kind
    }

    fn check_kinds(&self) -> Result<(), GraphError> {
        if self.source.kind != self.target.kind {
            return Err(GraphError::PortKindMismatch {
                source_port: format!("{}.{}", self.source.node, self.source.port),
                source_kind: self.source.kind.to_string(),
                target_port: format!("{}.{}", self.target.node, self.target.port),
                target_kind: self.target.kind.to_string(),
            });
        }
        Ok(())
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_ports_are_rejected_at_build_time() {
        let err =
            Connection::new(PortRef::exec("a", "out"), PortRef::data("b", "value")).unwrap_err();
        assert!(matches!(err, GraphError::PortKindMismatch { .. }));
    }

    #[test]
    fn validate_catches_dangling_connection() {
        let mut graph = WorkflowGraph::new("dangling");
        graph.add_node(NodeInstance::new("a", node_types::START));
        graph.connect("a", "exec_out", "ghost", "exec_in");
        assert_eq!(graph.validate(), Err(GraphError::NodeNotFound("ghost".into())));
    }

    #[test]
    fn validate_catches_duplicate_ids() {
        let mut graph = WorkflowGraph::new("dupes");
        graph.add_node(NodeInstance::new("a", node_types::START));
        graph.add_node(NodeInstance::new("a", node_types::END));
        assert_eq!(graph.validate(), Err(GraphError::DuplicateNodeId("a".into())));
    }

    #[test]
    fn deserialized_kind_mismatch_fails_validation() {
        let json = r#"{
            "name": "bad",
            "nodes": [
                {"id": "a", "node_type": "control.start"},
                {"id": "b", "node_type": "control.end"}
            ],
            "connections": [
                {"source": {"node": "a", "port": "out", "kind": "exec"},
                 "target": {"node": "b", "port": "in", "kind": "data"}}
            ]
        }"#;
        let graph: WorkflowGraph = serde_json::from_str(json).unwrap();
        assert!(matches!(graph.validate(), Err(GraphError::PortKindMismatch { .. })));
    }
}
