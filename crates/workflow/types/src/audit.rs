//! Append-only audit log
//!
//! Every state transition of an instance appends one [`AuditEntry`].
//! Entries are ordered by an instance-local sequence number. Once the
//! instance reaches a terminal status the log is sealed and any further
//! append is an error.

use crate::{
    DecisionAction, EdgeId, InstanceStatus, NodeId, NodeType, Principal, RequestInstanceId,
    WorkflowError, WorkflowResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub instance_id: RequestInstanceId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Principal>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// What happened, with its payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum AuditEvent {
    Submitted {
        definition_id: String,
        definition_version: u32,
    },
    NodeActivated {
        node_id: NodeId,
        node_type: NodeType,
    },
    EdgeTaken {
        edge_id: EdgeId,
        from: NodeId,
        to: NodeId,
    },
    ApproversResolved {
        node_id: NodeId,
        approvers: Vec<Principal>,
        required: Vec<Principal>,
    },
    ApproverResolutionFailed {
        node_id: NodeId,
        attempt: u32,
        error: String,
        retry_at: DateTime<Utc>,
    },
    DeadlineSet {
        node_id: NodeId,
        deadline: DateTime<Utc>,
    },
    DecisionRecorded {
        node_id: NodeId,
        action: DecisionAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delegate_to: Option<Principal>,
    },
    StepCompleted {
        node_id: NodeId,
    },
    StepRejected {
        node_id: NodeId,
    },
    StepEscalated {
        node_id: NodeId,
        added: Vec<Principal>,
        deadline: Option<DateTime<Utc>>,
    },
    NotificationForwarded {
        node_id: NodeId,
        template: String,
    },
    Blocked {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<NodeId>,
        reason: String,
    },
    Fault {
        reason: String,
    },
    Finished {
        status: InstanceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl AuditEvent {
    /// Short machine name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::NodeActivated { .. } => "node_activated",
            Self::EdgeTaken { .. } => "edge_taken",
            Self::ApproversResolved { .. } => "approvers_resolved",
            Self::ApproverResolutionFailed { .. } => "approver_resolution_failed",
            Self::DeadlineSet { .. } => "deadline_set",
            Self::DecisionRecorded { .. } => "decision_recorded",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepRejected { .. } => "step_rejected",
            Self::StepEscalated { .. } => "step_escalated",
            Self::NotificationForwarded { .. } => "notification_forwarded",
            Self::Blocked { .. } => "blocked",
            Self::Fault { .. } => "fault",
            Self::Finished { .. } => "finished",
        }
    }
}

/// The ordered audit trail of one instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    instance_id: RequestInstanceId,
    entries: Vec<AuditEntry>,
    #[serde(default)]
    sealed: bool,
}

impl AuditLog {
    pub fn new(instance_id: RequestInstanceId) -> Self {
        Self {
            instance_id,
            entries: Vec::new(),
            sealed: false,
        }
    }

    /// Append an entry, returning its sequence number
    pub fn append(
        &mut self,
        actor: Option<Principal>,
        event: AuditEvent,
        timestamp: DateTime<Utc>,
    ) -> WorkflowResult<u64> {
        if self.sealed {
            return Err(WorkflowError::AuditLogSealed(self.instance_id.clone()));
        }
        let sequence = self.entries.len() as u64;
        self.entries.push(AuditEntry {
            instance_id: self.instance_id.clone(),
            sequence,
            timestamp,
            actor,
            event,
        });
        Ok(sequence)
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries concerning one node, in order
    pub fn for_node<'a>(&'a self, node_id: &'a NodeId) -> impl Iterator<Item = &'a AuditEntry> + 'a {
        self.entries.iter().filter(move |e| match &e.event {
            AuditEvent::NodeActivated { node_id: n, .. }
            | AuditEvent::ApproversResolved { node_id: n, .. }
            | AuditEvent::ApproverResolutionFailed { node_id: n, .. }
            | AuditEvent::DeadlineSet { node_id: n, .. }
            | AuditEvent::DecisionRecorded { node_id: n, .. }
            | AuditEvent::StepCompleted { node_id: n }
            | AuditEvent::StepRejected { node_id: n }
            | AuditEvent::StepEscalated { node_id: n, .. }
            | AuditEvent::NotificationForwarded { node_id: n, .. } => n == node_id,
            AuditEvent::Blocked { node_id: n, .. } => n.as_ref() == Some(node_id),
            _ => false,
        })
    }
}
