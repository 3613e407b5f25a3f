//! Indexed, validated view of a published definition
//!
//! The engine never walks the node and edge vectors directly. A
//! [`WorkflowGraph`] is built once per published version and answers
//! `id -> node` and `id -> outgoing edges` lookups by index.

use crate::{
    Condition, NodeId, ValidationError, WorkflowDefinition, WorkflowDefinitionId, WorkflowEdge,
    WorkflowNode,
};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct WorkflowGraph {
    definition: WorkflowDefinition,
    nodes: HashMap<NodeId, usize>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    start: usize,
}

impl WorkflowGraph {
    /// Validate `definition` and index it
    pub fn build(definition: WorkflowDefinition) -> Result<Self, Vec<ValidationError>> {
        definition.validate()?;

        let nodes: HashMap<NodeId, usize> = definition
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (i, edge) in definition.edges.iter().enumerate() {
            outgoing.entry(edge.source.clone()).or_default().push(i);
        }
        let start = definition
            .nodes
            .iter()
            .position(|n| n.node_type() == crate::NodeType::Start)
            .ok_or_else(|| vec![ValidationError::NoStartNode])?;

        Ok(Self {
            definition,
            nodes,
            outgoing,
            start,
        })
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn id(&self) -> &WorkflowDefinitionId {
        &self.definition.id
    }

    pub fn version(&self) -> u32 {
        self.definition.version
    }

    pub fn node(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.nodes.get(id).map(|&i| &self.definition.nodes[i])
    }

    pub fn start(&self) -> &WorkflowNode {
        &self.definition.nodes[self.start]
    }

    /// Edges leaving `id`, in declaration order
    pub fn outgoing(&self, id: &NodeId) -> impl Iterator<Item = &WorkflowEdge> + '_ {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.definition.edges[i])
    }

    /// Every edge condition in the graph
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> + '_ {
        self.definition.edges.iter().flat_map(|e| e.conditions.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Condition, NodeType};

    fn branching() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("branching").with_id("branching");
        def.add_node(WorkflowNode::start("start")).unwrap();
        def.add_node(WorkflowNode::condition("check", "Amount check")).unwrap();
        def.add_node(WorkflowNode::notification("big", "Big spend", "big-spend"))
            .unwrap();
        def.add_node(WorkflowNode::end("end")).unwrap();
        def.add_edge(WorkflowEdge::new("start", "check")).unwrap();
        def.add_edge(WorkflowEdge::conditional(
            "check",
            "big",
            Condition::greater_than("amount", 1000_i64),
        ))
        .unwrap();
        def.add_edge(WorkflowEdge::new("check", "end")).unwrap();
        def.add_edge(WorkflowEdge::new("big", "end")).unwrap();
        def
    }

    #[test]
    fn test_build_indexes_nodes_and_edges() {
        let graph = WorkflowGraph::build(branching()).unwrap();
        assert_eq!(graph.start().id, NodeId::new("start"));
        assert_eq!(
            graph.node(&NodeId::new("big")).unwrap().node_type(),
            NodeType::Notification
        );
        assert!(graph.node(&NodeId::new("missing")).is_none());

        let targets: Vec<_> = graph
            .outgoing(&NodeId::new("check"))
            .map(|e| e.target.0.as_str())
            .collect();
        assert_eq!(targets, vec!["big", "end"]);
        assert_eq!(graph.outgoing(&NodeId::new("end")).count(), 0);
        assert_eq!(graph.conditions().count(), 1);
    }

    #[test]
    fn test_build_rejects_invalid_definition() {
        let mut def = branching();
        def.nodes.retain(|n| n.node_type() != NodeType::Start);
        let errors = WorkflowGraph::build(def).unwrap_err();
        assert!(errors.contains(&ValidationError::NoStartNode));
    }
}
