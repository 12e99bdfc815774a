//! Pure graph analysis over the exec edges of a workflow
//!
//! Answers start discovery, next-node routing, control-flow classification,
//! reachability and run-to-node subgraph questions. Never mutates anything.

use graphcore::{node_types, GraphError, NodeId, NodeInstance, NodeOutput, WorkflowGraph};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use std::collections::{HashMap, HashSet};

/// Branch port of a try/catch node guarding its body
pub const TRY_PORT: &str = "try";
/// Branch port of a try/catch node taken after a guarded failure
pub const CATCH_PORT: &str = "catch";

/// Node types whose routing depends on a runtime branch discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlowKind {
    If,
    Switch,
    Loop,
    TryCatch,
}

impl ControlFlowKind {
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        match tag {
            node_types::IF => Some(ControlFlowKind::If),
            node_types::SWITCH => Some(ControlFlowKind::Switch),
            node_types::LOOP => Some(ControlFlowKind::Loop),
            node_types::TRY_CATCH => Some(ControlFlowKind::TryCatch),
            _ => None,
        }
    }
}

pub struct ExecutionOrchestrator<'g> {
    graph: &'g WorkflowGraph,
    exec_graph: DiGraph<NodeId, ()>,
    node_to_index: HashMap<NodeId, NodeIndex>,
}

impl<'g> ExecutionOrchestrator<'g> {
    /// Build the exec-edge index. Connections to unknown nodes are ignored here;
    /// `WorkflowGraph::validate` reports them.
    pub fn new(graph: &'g WorkflowGraph) -> Self {
        let mut exec_graph = DiGraph::new();
        let mut node_to_index = HashMap::new();

        for node in &graph.nodes {
            let idx = exec_graph.add_node(node.id.clone());
            node_to_index.insert(node.id.clone(), idx);
        }

        for conn in graph.exec_connections() {
            if let (Some(from), Some(to)) = (
                node_to_index.get(&conn.source.node),
                node_to_index.get(&conn.target.node),
            ) {
                exec_graph.add_edge(*from, *to, ());
            }
        }

        Self {
            graph,
            exec_graph,
            node_to_index,
        }
    }

    pub fn graph(&self) -> &'g WorkflowGraph {
        self.graph
    }

    /// The single node of type `control.start`
    pub fn find_start_node(&self) -> Result<&'g NodeInstance, GraphError> {
        let starts: Vec<&NodeInstance> = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.node_type == node_types::START)
            .collect();

        match starts.as_slice() {
            [] => Err(GraphError::NoStartNode),
            [start] => Ok(*start),
            many => Err(GraphError::AmbiguousStart(
                many.iter().map(|n| n.id.clone()).collect(),
            )),
        }
    }

    pub fn is_control_flow_node(&self, node: &NodeInstance) -> bool {
        ControlFlowKind::from_type_tag(&node.node_type).is_some()
    }

    /// Successors of `node` after it produced `last_output`, in declaration order.
    ///
    /// Control-flow nodes only follow exec connections leaving the port named by
    /// `last_output.branch`.
    pub fn get_next_nodes(
        &self,
        node: &NodeInstance,
        last_output: Option<&NodeOutput>,
    ) -> Vec<NodeId> {
        let outgoing = self
            .graph
            .exec_connections()
            .filter(|c| c.source.node == node.id);

        if !self.is_control_flow_node(node) {
            return outgoing.map(|c| c.target.node.clone()).collect();
        }

        let Some(branch) = last_output.and_then(|o| o.branch.as_deref()) else {
            tracing::warn!(
                "Control-flow node {} ({}) reported no branch; nothing follows it",
                node.id,
                node.node_type
            );
            return Vec::new();
        };

        let next: Vec<NodeId> = outgoing
            .filter(|c| c.source.port == branch)
            .map(|c| c.target.node.clone())
            .collect();
        tracing::debug!("Node {} took branch '{}' -> {:?}", node.id, branch, next);
        next
    }

    /// Forward reachability over exec edges. A node reaches itself.
    pub fn is_reachable(&self, from: &str, to: &str) -> bool {
        match (self.node_to_index.get(from), self.node_to_index.get(to)) {
            (Some(from), Some(to)) => has_path_connecting(&self.exec_graph, *from, *to, None),
            _ => false,
        }
    }

    /// Innermost try/catch guarding `failed_id`.
    ///
    /// Scans `visited` from the most recent node backwards for a try/catch
    /// node other than `failed_id` whose `try` branch reaches the failed node
    /// and which has at least one `catch` connection.
    pub fn find_catch_handler<'v>(
        &self,
        failed_id: &str,
        visited: impl DoubleEndedIterator<Item = &'v NodeId>,
    ) -> Option<&'g NodeInstance> {
        visited
            .rev()
            .filter(|id| id.as_str() != failed_id)
            .filter_map(|id| self.graph.find_node(id))
            .filter(|node| {
                ControlFlowKind::from_type_tag(&node.node_type) == Some(ControlFlowKind::TryCatch)
            })
            .find(|node| {
                !self.branch_targets(&node.id, CATCH_PORT).is_empty()
                    && self
                        .branch_targets(&node.id, TRY_PORT)
                        .into_iter()
                        .any(|next| self.is_reachable(next, failed_id))
            })
    }

    /// Targets of exec connections leaving `port` of `node_id`, in declaration order
    pub fn branch_targets(&self, node_id: &str, port: &str) -> Vec<&'g str> {
        self.graph
            .exec_connections()
            .filter(|c| c.source.node == node_id && c.source.port == port)
            .map(|c| c.target.node.as_str())
            .collect()
    }

    /// Node ids a run-to-node execution of `target_id` must visit.
    ///
    /// Every exec ancestor of the target. A control-flow node with a branch
    /// leading to the target is one of those ancestors.
    pub fn calculate_execution_path(
        &self,
        target_id: &str,
    ) -> Result<HashSet<NodeId>, GraphError> {
        let target = *self
            .node_to_index
            .get(target_id)
            .ok_or_else(|| GraphError::UnreachableTarget(target_id.to_string()))?;

        let mut required = HashSet::new();
        let reversed = Reversed(&self.exec_graph);
        let mut bfs = Bfs::new(reversed, target);
        while let Some(idx) = bfs.next(reversed) {
            required.insert(self.exec_graph[idx].clone());
        }

        tracing::debug!(
            "Run-to-node {} requires {} of {} nodes",
            target_id,
            required.len(),
            self.graph.nodes.len()
        );
        Ok(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, node_type: &str) -> NodeInstance {
        NodeInstance::new(id, node_type)
    }

    /// start -> a -> b
    fn linear() -> WorkflowGraph {
        let mut g = WorkflowGraph::new("linear");
        g.add_node(node("start", node_types::START));
        g.add_node(node("a", "test.task"));
        g.add_node(node("b", "test.task"));
        g.connect("start", "exec_out", "a", "exec_in");
        g.connect("a", "exec_out", "b", "exec_in");
        g
    }

    /// start -> if -{true}-> a -> end, if -{false}-> b -> end
    fn branching() -> WorkflowGraph {
        let mut g = WorkflowGraph::new("branching");
        g.add_node(node("start", node_types::START));
        g.add_node(node("if", node_types::IF));
        g.add_node(node("a", "test.task"));
        g.add_node(node("b", "test.task"));
        g.add_node(node("end", node_types::END));
        g.connect("start", "exec_out", "if", "exec_in");
        g.connect("if", "true", "a", "exec_in");
        g.connect("if", "false", "b", "exec_in");
        g.connect("a", "exec_out", "end", "exec_in");
        g.connect("b", "exec_out", "end", "exec_in");
        g
    }

    fn set(ids: &[&str]) -> HashSet<NodeId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn start_discovery() {
        let g = linear();
        let orch = ExecutionOrchestrator::new(&g);
        assert_eq!(orch.find_start_node().unwrap().id, "start");

        let mut none = WorkflowGraph::new("none");
        none.add_node(node("a", "test.task"));
        assert_eq!(
            ExecutionOrchestrator::new(&none).find_start_node().unwrap_err(),
            GraphError::NoStartNode
        );

        let mut two = linear();
        two.add_node(node("start2", node_types::START));
        assert!(matches!(
            ExecutionOrchestrator::new(&two).find_start_node(),
            Err(GraphError::AmbiguousStart(ids)) if ids.len() == 2
        ));
    }

    #[test]
    fn plain_nodes_follow_all_exec_edges_in_order() {
        let mut g = linear();
        g.add_node(node("c", "test.task"));
        g.connect("start", "exec_out", "c", "exec_in");
        g.connect_data("start", "value", "b", "value");
        let orch = ExecutionOrchestrator::new(&g);
        let start = g.find_node("start").unwrap();
        assert_eq!(orch.get_next_nodes(start, None), vec!["a", "c"]);
    }

    #[test]
    fn control_flow_follows_selected_branch_only() {
        let g = branching();
        let orch = ExecutionOrchestrator::new(&g);
        let decision = g.find_node("if").unwrap();

        let taken = NodeOutput::new().with_branch("false");
        assert_eq!(orch.get_next_nodes(decision, Some(&taken)), vec!["b"]);
        assert!(orch.get_next_nodes(decision, None).is_empty());
        assert!(orch.is_control_flow_node(decision));
        assert!(!orch.is_control_flow_node(g.find_node("a").unwrap()));
    }

    #[test]
    fn reachability_uses_exec_edges_only() {
        let mut g = linear();
        g.add_node(node("island", "test.task"));
        g.connect_data("b", "value", "island", "value");
        let orch = ExecutionOrchestrator::new(&g);
        assert!(orch.is_reachable("start", "b"));
        assert!(!orch.is_reachable("b", "start"));
        assert!(!orch.is_reachable("b", "island"));
        assert!(!orch.is_reachable("start", "ghost"));
    }

    #[test]
    fn execution_path_of_leaf_is_whole_linear_graph() {
        let g = linear();
        let orch = ExecutionOrchestrator::new(&g);
        assert_eq!(orch.calculate_execution_path("b").unwrap(), set(&["start", "a", "b"]));
        assert_eq!(orch.calculate_execution_path("a").unwrap(), set(&["start", "a"]));
    }

    #[test]
    fn execution_path_keeps_decision_node() {
        let g = branching();
        let orch = ExecutionOrchestrator::new(&g);
        assert_eq!(orch.calculate_execution_path("a").unwrap(), set(&["start", "if", "a"]));
        assert_eq!(
            orch.calculate_execution_path("end").unwrap(),
            set(&["start", "if", "a", "b", "end"])
        );
    }

    #[test]
    fn execution_path_is_closed_under_ancestors() {
        let g = branching();
        let orch = ExecutionOrchestrator::new(&g);
        for target in ["start", "if", "a", "b", "end"] {
            let path = orch.calculate_execution_path(target).unwrap();
            assert!(path.contains(target));
            for conn in g.exec_connections() {
                if path.contains(&conn.target.node) {
                    assert!(
                        path.contains(&conn.source.node),
                        "{} missing for {}",
                        conn.source.node,
                        target
                    );
                }
            }
        }
    }

    #[test]
    fn execution_path_terminates_on_cycles() {
        let mut g = linear();
        g.connect("b", "exec_out", "a", "exec_in");
        let orch = ExecutionOrchestrator::new(&g);
        assert_eq!(orch.calculate_execution_path("a").unwrap(), set(&["start", "a", "b"]));
        assert!(orch.is_reachable("b", "a"));
    }

    /// start -> tc -{try}-> risky -> after, tc -{catch}-> recover
    fn guarded() -> WorkflowGraph {
        let mut g = WorkflowGraph::new("guarded");
        g.add_node(node("start", node_types::START));
        g.add_node(node("tc", node_types::TRY_CATCH));
        g.add_node(node("risky", "test.task"));
        g.add_node(node("after", "test.task"));
        g.add_node(node("recover", "test.task"));
        g.connect("start", "exec_out", "tc", "exec_in");
        g.connect("tc", TRY_PORT, "risky", "exec_in");
        g.connect("risky", "exec_out", "after", "exec_in");
        g.connect("tc", CATCH_PORT, "recover", "exec_in");
        g
    }

    #[test]
    fn catch_handler_guards_nodes_behind_try() {
        let g = guarded();
        let orch = ExecutionOrchestrator::new(&g);
        let visited: Vec<NodeId> = ["start", "tc", "risky", "after"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let handler = orch.find_catch_handler("after", visited.iter());
        assert_eq!(handler.map(|n| n.id.as_str()), Some("tc"));
        assert_eq!(orch.branch_targets("tc", CATCH_PORT), vec!["recover"]);

        assert!(orch.find_catch_handler("start", visited[..1].iter()).is_none());
        assert!(orch.find_catch_handler("recover", visited.iter()).is_none());
    }

    #[test]
    fn catch_handler_needs_a_catch_connection() {
        let mut g = guarded();
        g.connections.retain(|c| c.source.port != CATCH_PORT);
        let orch = ExecutionOrchestrator::new(&g);
        let visited = vec!["start".to_string(), "tc".to_string(), "risky".to_string()];
        assert!(orch.find_catch_handler("risky", visited.iter()).is_none());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let g = linear();
        let orch = ExecutionOrchestrator::new(&g);
        assert_eq!(
            orch.calculate_execution_path("nope").unwrap_err(),
            GraphError::UnreachableTarget("nope".into())
        );
    }
}
