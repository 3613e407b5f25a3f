//! Domain events handed to the notifier

use crate::{NodeId, Principal, RequestInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEventKind {
    Submitted,
    /// Approvers of a step were resolved and can decide
    ActionRequired,
    /// A step reached its approval threshold
    Approved,
    Rejected,
    Escalated,
    Delegated,
    /// The instance reached a terminal outcome
    Completed,
    /// A notification node was passed
    Notification,
    Cancelled,
    Blocked,
}

impl std::fmt::Display for DomainEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Submitted => "submitted",
            Self::ActionRequired => "action_required",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Delegated => "delegated",
            Self::Completed => "completed",
            Self::Notification => "notification",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: DomainEventKind,
    pub instance_id: RequestInstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: DomainEventKind, instance_id: RequestInstanceId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            instance_id,
            node_id: None,
            recipients: Vec::new(),
            template: None,
            detail: None,
            occurred_at,
        }
    }

    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_recipients(mut self, recipients: impl IntoIterator<Item = Principal>) -> Self {
        self.recipients.extend(recipients);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
