//! Workflow definitions: the blueprint for approval processes
//!
//! A WorkflowDefinition is a directed acyclic graph where:
//! - Nodes are typed steps (start, approval, condition, notification, end)
//! - Edges are transitions, optionally guarded by field conditions
//!
//! Definitions are immutable once published. Publishing the same id
//! again yields the next version; running requests stay pinned to the
//! version they were submitted against.

use crate::{validation, ValidationError, WorkflowEdge, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowDefinitionId(pub String);

impl WorkflowDefinitionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a node within a definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// A workflow definition: the blueprint for an approval process
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier, stable across versions
    pub id: WorkflowDefinitionId,
    /// Assigned by the definition store on publish
    #[serde(default)]
    pub version: u32,
    /// Human-readable name
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl WorkflowDefinition {
    /// Create a new, empty workflow definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowDefinitionId::generate(),
            version: 0,
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = WorkflowDefinitionId::new(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a node to the workflow graph
    pub fn add_node(&mut self, node: WorkflowNode) -> WorkflowResult<()> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(WorkflowError::DuplicateNodeId(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Add an edge to the workflow graph
    ///
    /// Both endpoints must already exist. Edge order matters: conditioned
    /// edges leaving a node are evaluated in the order they were added.
    pub fn add_edge(&mut self, edge: WorkflowEdge) -> WorkflowResult<()> {
        if !self.nodes.iter().any(|n| n.id == edge.source) {
            return Err(WorkflowError::NodeNotFound(edge.source));
        }
        if !self.nodes.iter().any(|n| n.id == edge.target) {
            return Err(WorkflowError::NodeNotFound(edge.target));
        }
        if self.edges.iter().any(|e| e.id == edge.id) {
            return Err(WorkflowError::DuplicateEdgeId(edge.id));
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Get the start node
    pub fn start_node(&self) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.node_type() == NodeType::Start)
    }

    /// Get the end nodes
    pub fn end_nodes(&self) -> Vec<&WorkflowNode> {
        self.nodes
            .iter()
            .filter(|n| n.node_type() == NodeType::End)
            .collect()
    }

    /// Get a node by ID
    pub fn get_node(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Get outgoing edges from a node, in declaration order
    pub fn outgoing_edges(&self, node_id: &NodeId) -> Vec<&WorkflowEdge> {
        self.edges.iter().filter(|e| &e.source == node_id).collect()
    }

    /// Get incoming edges to a node
    pub fn incoming_edges(&self, node_id: &NodeId) -> Vec<&WorkflowEdge> {
        self.edges.iter().filter(|e| &e.target == node_id).collect()
    }

    /// Validate the definition, collecting every structural problem
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        validation::validate(self)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

// ── Workflow Node ────────────────────────────────────────────────────

/// A step in the workflow graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier within this workflow
    pub id: NodeId,
    /// Human-readable name, shown in inbox and audit views
    #[serde(default)]
    pub name: String,
    /// Type tag plus the configuration that type carries
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(id),
            name: name.into(),
            kind,
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, "Start", NodeKind::Start)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, "End", NodeKind::End)
    }

    pub fn approval(id: impl Into<String>, name: impl Into<String>, config: ApprovalConfig) -> Self {
        Self::new(id, name, NodeKind::Approval(config))
    }

    /// A branch point; the branching itself lives on outgoing edges
    pub fn condition(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, NodeKind::Condition)
    }

    pub fn notification(
        id: impl Into<String>,
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            name,
            NodeKind::Notification(NotificationConfig {
                template: template.into(),
            }),
        )
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Start => NodeType::Start,
            NodeKind::Approval(_) => NodeType::Approval,
            NodeKind::Condition => NodeType::Condition,
            NodeKind::Notification(_) => NodeType::Notification,
            NodeKind::End => NodeType::End,
        }
    }

    pub fn approval_config(&self) -> Option<&ApprovalConfig> {
        match &self.kind {
            NodeKind::Approval(config) => Some(config),
            _ => None,
        }
    }

    /// Nodes that never wait on a principal
    pub fn is_control_flow(&self) -> bool {
        !matches!(self.kind, NodeKind::Approval(_))
    }
}

/// Node type together with its type-specific configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Approval(ApprovalConfig),
    Condition,
    Notification(NotificationConfig),
    End,
}

// ── Node Type ────────────────────────────────────────────────────────

/// The type of a workflow node, without its configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Approval,
    Condition,
    Notification,
    End,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Approval => "approval",
            Self::Condition => "condition",
            Self::Notification => "notification",
            Self::End => "end",
        };
        f.write_str(name)
    }
}

// ── Approval Configuration ───────────────────────────────────────────

/// Longest deadline a step may set: ten years
pub const MAX_DEADLINE_SECS: u64 = 10 * 366 * 24 * 60 * 60;

/// Who must act on an approval step, how their decisions combine, and
/// what happens when they do not act in time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    pub approvers: Vec<ApproverRef>,
    #[serde(default)]
    pub decision_policy: DecisionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
}

impl ApprovalConfig {
    pub fn new(approvers: Vec<ApproverRef>, decision_policy: DecisionPolicy) -> Self {
        Self {
            approvers,
            decision_policy,
            timeout_secs: None,
            escalation: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = Some(escalation);
        self
    }

    /// Seconds from activation until the first deadline.
    ///
    /// Falls back to the escalation delay when no explicit timeout is set.
    pub fn initial_deadline_secs(&self) -> Option<u64> {
        self.timeout_secs
            .or_else(|| self.escalation.as_ref().map(|e| e.after_secs))
    }

    /// Largest quorum the refs can ever reach, when it is known statically.
    ///
    /// Quorum counts required approvers (every approver when no ref is
    /// required). Only user refs have a fixed size; roles, departments and
    /// managers expand at resolution time, so any of them among the counted
    /// refs makes the bound unknown.
    pub fn static_approver_bound(&self) -> Option<usize> {
        let any_required = self.approvers.iter().any(|a| a.required);
        let counted: Vec<&ApproverRef> = self
            .approvers
            .iter()
            .filter(|a| a.required || !any_required)
            .collect();
        if counted.iter().any(|a| a.kind != ApproverKind::User) {
            return None;
        }
        let users: std::collections::BTreeSet<&str> =
            counted.iter().map(|a| a.value.as_str()).collect();
        Some(users.len())
    }
}

/// How the decisions on an approval step combine into an outcome
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPolicy {
    /// Every required approver must approve; any reject rejects the step
    #[default]
    AllRequired,
    /// The step completes once `n` required approvers approve, in person
    /// or through a delegate
    Quorum(u32),
    /// Like AllRequired, but a single reject short-circuits immediately
    AnyRejectBlocks,
}

/// A reference to the principals who may act on a step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverRef {
    pub kind: ApproverKind,
    /// Role name, user id or department name; unused for `Manager`
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ApproverRef {
    pub fn new(kind: ApproverKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            required: true,
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self::new(ApproverKind::Role, role)
    }

    pub fn user(user: impl Into<String>) -> Self {
        Self::new(ApproverKind::User, user)
    }

    /// The requester's manager
    pub fn manager() -> Self {
        Self::new(ApproverKind::Manager, "")
    }

    pub fn department(department: impl Into<String>) -> Self {
        Self::new(ApproverKind::Department, department)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverKind {
    Role,
    User,
    Manager,
    Department,
}

impl std::fmt::Display for ApproverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Role => "role",
            Self::User => "user",
            Self::Manager => "manager",
            Self::Department => "department",
        };
        f.write_str(name)
    }
}

/// The single escalation stage of an approval step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub after_secs: u64,
    pub escalate_to: Vec<ApproverRef>,
    #[serde(default)]
    pub notify_original_approvers: bool,
}

impl Escalation {
    pub fn new(after_secs: u64, escalate_to: Vec<ApproverRef>) -> Self {
        Self {
            after_secs,
            escalate_to,
            notify_original_approvers: false,
        }
    }

    pub fn notifying_original_approvers(mut self) -> Self {
        self.notify_original_approvers = true;
        self
    }
}

/// Configuration of a notification step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Opaque to the engine; forwarded to the notifier as-is
    pub template: String,
}
