/// Graph building and validation
///
/// Turns the editor's raw node/edge lists into a petgraph DiGraph of typed
/// node specs. Validation is deliberately shallow: edge endpoints must
/// exist, the graph must be non-empty and have at least one start node,
/// and every node's params must decode. Cyclic subgraphs that no start
/// node can reach are tolerated; the scheduler simply never visits them.

use crate::workflow::types::{NodeParams, NodeSpec, WorkflowEdge, WorkflowNode};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use thiserror::Error;

/// Structural problems that make a workflow unrunnable
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("workflow has no nodes")]
    EmptyGraph,

    #[error("edge '{edge}' references unknown node '{node}'")]
    UnknownNode { edge: String, node: String },

    #[error("workflow has no start node (every node has an incoming edge)")]
    NoStartNode,

    #[error("invalid parameters for node '{node}': {source}")]
    InvalidParams {
        node: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A validated, executable workflow graph
///
/// Wraps the petgraph structure with an id lookup map and the precomputed
/// start set (nodes with no incoming edges).
#[derive(Debug)]
pub struct ValidatedGraph {
    graph: DiGraph<NodeSpec, ()>,
    id_to_index: HashMap<String, NodeIndex>,
    start_nodes: Vec<NodeIndex>,
}

impl ValidatedGraph {
    /// Validate the editor's node/edge lists and build the graph
    pub fn build(
        nodes: &[WorkflowNode],
        edges: &[WorkflowEdge],
    ) -> Result<ValidatedGraph, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let mut graph = DiGraph::new();
        let mut id_to_index = HashMap::with_capacity(nodes.len());

        for node in nodes {
            let params = NodeParams::decode(node.node_type, &node.data).map_err(|source| {
                GraphError::InvalidParams {
                    node: node.id.clone(),
                    source,
                }
            })?;

            let label = node
                .data
                .get("label")
                .and_then(|l| l.as_str())
                .unwrap_or(&node.id)
                .to_string();

            let index = graph.add_node(NodeSpec {
                id: node.id.clone(),
                node_type: node.node_type,
                label,
                params,
            });
            id_to_index.insert(node.id.clone(), index);
        }

        for edge in edges {
            let source = *id_to_index
                .get(&edge.source)
                .ok_or_else(|| GraphError::UnknownNode {
                    edge: edge.id.clone(),
                    node: edge.source.clone(),
                })?;
            let target = *id_to_index
                .get(&edge.target)
                .ok_or_else(|| GraphError::UnknownNode {
                    edge: edge.id.clone(),
                    node: edge.target.clone(),
                })?;
            graph.add_edge(source, target, ());
        }

        let start_nodes: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&idx| {
                graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect();

        if start_nodes.is_empty() {
            return Err(GraphError::NoStartNode);
        }

        Ok(ValidatedGraph {
            graph,
            id_to_index,
            start_nodes,
        })
    }

    pub fn node(&self, index: NodeIndex) -> &NodeSpec {
        &self.graph[index]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Start nodes in declaration order
    pub fn start_nodes(&self) -> &[NodeIndex] {
        &self.start_nodes
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.id_to_index.get(node_id).copied()
    }

    pub fn successors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect()
    }

    pub fn predecessors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::NodeType;
    use serde_json::json;

    fn node(id: &str, node_type: NodeType) -> WorkflowNode {
        WorkflowNode {
            id: id.to_string(),
            node_type,
            position: None,
            data: json!({"label": id}),
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> WorkflowEdge {
        WorkflowEdge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
        }
    }

    #[test]
    fn empty_graph_is_rejected() {
        let err = ValidatedGraph::build(&[], &[]).unwrap_err();
        assert!(matches!(err, GraphError::EmptyGraph));
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let nodes = vec![node("a", NodeType::Input)];
        let edges = vec![edge("e1", "a", "ghost")];
        let err = ValidatedGraph::build(&nodes, &edges).unwrap_err();
        match err {
            GraphError::UnknownNode { edge, node } => {
                assert_eq!(edge, "e1");
                assert_eq!(node, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn pure_cycle_has_no_start_node() {
        let nodes = vec![node("a", NodeType::Input), node("b", NodeType::Output)];
        let edges = vec![edge("e1", "a", "b"), edge("e2", "b", "a")];
        let err = ValidatedGraph::build(&nodes, &edges).unwrap_err();
        assert!(matches!(err, GraphError::NoStartNode));
    }

    #[test]
    fn diamond_has_a_single_start() {
        let nodes = vec![
            node("a", NodeType::Input),
            node("b", NodeType::AiExtract),
            node("c", NodeType::AiAnalyze),
            node("d", NodeType::Output),
        ];
        let edges = vec![
            edge("e1", "a", "b"),
            edge("e2", "a", "c"),
            edge("e3", "b", "d"),
            edge("e4", "c", "d"),
        ];
        let graph = ValidatedGraph::build(&nodes, &edges).unwrap();
        assert_eq!(graph.start_nodes().len(), 1);
        let start = graph.node(graph.start_nodes()[0]);
        assert_eq!(start.id, "a");
        let d = graph.index_of("d").unwrap();
        assert_eq!(graph.predecessors(d).len(), 2);
    }

    #[test]
    fn unreachable_cycle_is_tolerated() {
        // The disconnected x<->y cycle must not fail validation; a start
        // node exists elsewhere and the cycle is simply never scheduled.
        let nodes = vec![
            node("a", NodeType::Input),
            node("x", NodeType::AiAnalyze),
            node("y", NodeType::AiAnalyze),
        ];
        let edges = vec![edge("e1", "x", "y"), edge("e2", "y", "x")];
        let graph = ValidatedGraph::build(&nodes, &edges).unwrap();
        assert_eq!(graph.start_nodes().len(), 1);
        assert_eq!(graph.node(graph.start_nodes()[0]).id, "a");
    }

    #[test]
    fn undecodable_params_are_rejected() {
        let mut bad = node("a", NodeType::BatchCrawl);
        bad.data = json!({"label": "crawl", "maxPages": "ten"});
        let err = ValidatedGraph::build(&[bad], &[]).unwrap_err();
        match err {
            GraphError::InvalidParams { node, .. } => assert_eq!(node, "a"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
