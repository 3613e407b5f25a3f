//! Structural validation of workflow definitions
//!
//! Validation never stops at the first problem: every check runs and all
//! findings are returned together, so an author can fix a definition in
//! one pass. A definition with any finding is never published.

use crate::{
    ConditionOperator, DecisionPolicy, EdgeId, NodeId, NodeKind, NodeType, ValueKind,
    WorkflowDefinition, MAX_DEADLINE_SECS,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// A single structural problem found in a definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Definition has no nodes")]
    EmptyDefinition,

    #[error("Duplicate node id '{node}'")]
    DuplicateNodeId { node: NodeId },

    #[error("Duplicate edge id '{edge}'")]
    DuplicateEdgeId { edge: EdgeId },

    #[error("Definition has no start node")]
    NoStartNode,

    #[error("Definition has {} start nodes: {}", .nodes.len(), join_ids(.nodes))]
    MultipleStartNodes { nodes: Vec<NodeId> },

    #[error("Definition has no end node")]
    NoEndNode,

    #[error("Edge '{edge}' references unknown node '{node}'")]
    DanglingEdge { edge: EdgeId, node: NodeId },

    #[error("Node '{node}' has more than one unconditional outgoing edge")]
    MultipleDefaultEdges { node: NodeId },

    #[error("End node '{node}' has outgoing edges")]
    EndNodeHasOutgoing { node: NodeId },

    #[error("Start node '{node}' has incoming edges")]
    StartNodeHasIncoming { node: NodeId },

    #[error("Approval node '{node}' has no approvers")]
    NoApprovers { node: NodeId },

    #[error("Approval node '{node}' requires a quorum of {quorum} but counts {available} approver(s)")]
    InvalidQuorum {
        node: NodeId,
        quorum: u32,
        available: usize,
    },

    #[error("Approval node '{node}' escalates to nobody")]
    EmptyEscalation { node: NodeId },

    #[error("Approval node '{node}' has a zero-second deadline")]
    ZeroDeadline { node: NodeId },

    #[error("Approval node '{node}' sets a {secs}s deadline; the limit is {max}s")]
    DeadlineOutOfRange { node: NodeId, secs: u64, max: u64 },

    #[error("Edge '{edge}' applies {operator} to a {kind} value")]
    InvalidConditionOperand {
        edge: EdgeId,
        operator: ConditionOperator,
        kind: ValueKind,
    },

    #[error("Cycle through nodes: {}", join_ids(.nodes))]
    Cycle { nodes: Vec<NodeId> },

    #[error("Node '{node}' is unreachable from the start node")]
    Unreachable { node: NodeId },

    #[error("Node '{node}' has no path to an end node")]
    NoPathToEnd { node: NodeId },
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run every structural check against `definition`
pub fn validate(definition: &WorkflowDefinition) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if definition.nodes.is_empty() {
        errors.push(ValidationError::EmptyDefinition);
        return Err(errors);
    }

    // First declaration wins for duplicated ids
    let mut types: HashMap<&NodeId, NodeType> = HashMap::new();
    for node in &definition.nodes {
        if types.insert(&node.id, node.node_type()).is_some() {
            errors.push(ValidationError::DuplicateNodeId {
                node: node.id.clone(),
            });
        }
    }
    let mut seen_edges = HashSet::new();
    for edge in &definition.edges {
        if !seen_edges.insert(&edge.id) {
            errors.push(ValidationError::DuplicateEdgeId {
                edge: edge.id.clone(),
            });
        }
    }

    let starts: Vec<NodeId> = definition
        .nodes
        .iter()
        .filter(|n| n.node_type() == NodeType::Start)
        .map(|n| n.id.clone())
        .collect();
    match starts.len() {
        0 => errors.push(ValidationError::NoStartNode),
        1 => {}
        _ => errors.push(ValidationError::MultipleStartNodes {
            nodes: starts.clone(),
        }),
    }
    let ends: Vec<NodeId> = definition
        .nodes
        .iter()
        .filter(|n| n.node_type() == NodeType::End)
        .map(|n| n.id.clone())
        .collect();
    if ends.is_empty() {
        errors.push(ValidationError::NoEndNode);
    }

    // Adjacency over edges whose endpoints both exist
    let mut outgoing: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    let mut incoming: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    let mut defaults: HashMap<&NodeId, usize> = HashMap::new();
    for edge in &definition.edges {
        let mut dangling = false;
        for endpoint in [&edge.source, &edge.target] {
            if !types.contains_key(endpoint) {
                dangling = true;
                errors.push(ValidationError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
        for condition in &edge.conditions {
            let kind = condition.value.kind();
            if !condition.operator.accepts(kind) {
                errors.push(ValidationError::InvalidConditionOperand {
                    edge: edge.id.clone(),
                    operator: condition.operator,
                    kind,
                });
            }
        }
        if dangling {
            continue;
        }
        outgoing.entry(&edge.source).or_default().push(&edge.target);
        incoming.entry(&edge.target).or_default().push(&edge.source);
        if edge.is_unconditional() {
            *defaults.entry(&edge.source).or_default() += 1;
        }
    }

    for node in &definition.nodes {
        if defaults.get(&node.id).copied().unwrap_or(0) > 1 {
            errors.push(ValidationError::MultipleDefaultEdges {
                node: node.id.clone(),
            });
        }
        match &node.kind {
            NodeKind::End if outgoing.contains_key(&node.id) => {
                errors.push(ValidationError::EndNodeHasOutgoing {
                    node: node.id.clone(),
                });
            }
            NodeKind::Start if incoming.contains_key(&node.id) => {
                errors.push(ValidationError::StartNodeHasIncoming {
                    node: node.id.clone(),
                });
            }
            NodeKind::Approval(config) => {
                if config.approvers.is_empty() {
                    errors.push(ValidationError::NoApprovers {
                        node: node.id.clone(),
                    });
                }
                if let DecisionPolicy::Quorum(quorum) = config.decision_policy {
                    let bound = config.static_approver_bound();
                    let available = bound.unwrap_or(config.approvers.len());
                    if quorum == 0 || bound.is_some_and(|b| quorum as usize > b) {
                        errors.push(ValidationError::InvalidQuorum {
                            node: node.id.clone(),
                            quorum,
                            available,
                        });
                    }
                }
                if let Some(escalation) = &config.escalation {
                    if escalation.escalate_to.is_empty() {
                        errors.push(ValidationError::EmptyEscalation {
                            node: node.id.clone(),
                        });
                    }
                }
                if config.initial_deadline_secs() == Some(0) {
                    errors.push(ValidationError::ZeroDeadline {
                        node: node.id.clone(),
                    });
                }
                let escalation_secs = config.escalation.as_ref().map(|e| e.after_secs);
                for secs in config.timeout_secs.into_iter().chain(escalation_secs) {
                    if secs > MAX_DEADLINE_SECS {
                        errors.push(ValidationError::DeadlineOutOfRange {
                            node: node.id.clone(),
                            secs,
                            max: MAX_DEADLINE_SECS,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    let cycle = nodes_on_cycles(definition, &outgoing, &incoming);
    if !cycle.is_empty() {
        errors.push(ValidationError::Cycle { nodes: cycle });
    }

    if !starts.is_empty() {
        let reachable = traverse(starts.iter(), &outgoing);
        for node in &definition.nodes {
            if !reachable.contains(&node.id) {
                errors.push(ValidationError::Unreachable {
                    node: node.id.clone(),
                });
            }
        }
    }

    if !ends.is_empty() {
        let reaches_end = traverse(ends.iter(), &incoming);
        for node in &definition.nodes {
            if !reaches_end.contains(&node.id) {
                errors.push(ValidationError::NoPathToEnd {
                    node: node.id.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// All nodes reachable from `roots` following `adjacency`
fn traverse<'a>(
    roots: impl Iterator<Item = &'a NodeId>,
    adjacency: &HashMap<&NodeId, Vec<&'a NodeId>>,
) -> HashSet<&'a NodeId> {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<&NodeId> = roots.collect();

    while let Some(current) = queue.pop_front() {
        if visited.insert(current) {
            if let Some(next) = adjacency.get(current) {
                queue.extend(next.iter().copied().filter(|n| !visited.contains(n)));
            }
        }
    }

    visited
}

/// Nodes left after repeatedly peeling off sources and sinks.
///
/// Empty iff the graph is acyclic.
fn nodes_on_cycles(
    definition: &WorkflowDefinition,
    outgoing: &HashMap<&NodeId, Vec<&NodeId>>,
    incoming: &HashMap<&NodeId, Vec<&NodeId>>,
) -> Vec<NodeId> {
    let mut remaining: HashSet<&NodeId> = definition.nodes.iter().map(|n| &n.id).collect();

    loop {
        let peel: Vec<&NodeId> = remaining
            .iter()
            .copied()
            .filter(|id| {
                let has_in = incoming
                    .get(id)
                    .map_or(false, |srcs| srcs.iter().any(|s| remaining.contains(s)));
                let has_out = outgoing
                    .get(id)
                    .map_or(false, |dsts| dsts.iter().any(|d| remaining.contains(d)));
                !has_in || !has_out
            })
            .collect();
        if peel.is_empty() {
            break;
        }
        for id in peel {
            remaining.remove(id);
        }
    }

    definition
        .nodes
        .iter()
        .filter(|n| remaining.contains(&n.id))
        .map(|n| n.id.clone())
        .collect()
}
