//! Request instances: running executions of workflow definitions
//!
//! A RequestInstance tracks the runtime state of one submitted request:
//! which steps are active, who may act on them, what they decided, and
//! the audit trail of every transition. All mutators take the current
//! time explicitly and append the matching audit entry themselves.

use crate::{
    AuditEvent, AuditLog, Decision, DecisionAction, Fields, NodeId, NodeType, Principal,
    WorkflowDefinitionId, WorkflowError, WorkflowResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a request instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestInstanceId(pub String);

impl RequestInstanceId {
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

impl std::fmt::Display for RequestInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a deadline registered with the timer collaborator
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerHandle(pub String);

impl TimerHandle {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Request Metadata ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Who asked for what, independent of the typed fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    /// Anchor for manager resolution
    pub requester: Principal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl RequestMetadata {
    pub fn new(requester: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            priority: Priority::default(),
            requester: Principal::new(requester),
            due_date: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

// ── Request Instance ─────────────────────────────────────────────────

/// A running (or finished) request against a pinned definition version
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestInstance {
    pub id: RequestInstanceId,
    pub definition_id: WorkflowDefinitionId,
    pub definition_version: u32,
    pub request: RequestMetadata,
    pub fields: Fields,
    pub status: InstanceStatus,
    /// Activated, not yet finished steps
    pub current_node_ids: BTreeSet<NodeId>,
    pub step_states: HashMap<NodeId, StepState>,
    pub audit: AuditLog,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// Set when an engine invariant was violated for this instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    /// Bumped on every persisted change; orders snapshots of one instance
    #[serde(default)]
    pub revision: u64,
}

impl RequestInstance {
    pub fn new(
        definition_id: WorkflowDefinitionId,
        definition_version: u32,
        request: RequestMetadata,
        fields: Fields,
        now: DateTime<Utc>,
    ) -> Self {
        let id = RequestInstanceId::generate();
        Self {
            audit: AuditLog::new(id.clone()),
            id,
            definition_id,
            definition_version,
            request,
            fields,
            status: InstanceStatus::Pending,
            current_node_ids: BTreeSet::new(),
            step_states: HashMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            blocked_reason: None,
            fault: None,
            revision: 0,
        }
    }

    /// Append an audit entry
    pub fn record(
        &mut self,
        actor: Option<Principal>,
        event: AuditEvent,
        now: DateTime<Utc>,
    ) -> WorkflowResult<u64> {
        self.updated_at = now;
        self.audit.append(actor, event, now)
    }

    /// Activate a step. A node is activated at most once per instance.
    pub fn activate_step(
        &mut self,
        node_id: &NodeId,
        node_type: NodeType,
        now: DateTime<Utc>,
    ) -> WorkflowResult<&mut StepState> {
        if self.step_states.contains_key(node_id) {
            return Err(WorkflowError::NodeReactivated(node_id.clone()));
        }
        self.record(
            None,
            AuditEvent::NodeActivated {
                node_id: node_id.clone(),
                node_type,
            },
            now,
        )?;
        self.current_node_ids.insert(node_id.clone());
        Ok(self
            .step_states
            .entry(node_id.clone())
            .or_insert_with(|| StepState::activated(now)))
    }

    /// Mark an active step Completed, returning its timer to cancel
    pub fn complete_step(
        &mut self,
        node_id: &NodeId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Option<TimerHandle>> {
        let timer = self.finish_step(node_id, StepStatus::Completed, now)?;
        self.record(
            None,
            AuditEvent::StepCompleted {
                node_id: node_id.clone(),
            },
            now,
        )?;
        Ok(timer)
    }

    /// Mark an active step StepRejected, returning its timer to cancel
    pub fn reject_step(
        &mut self,
        node_id: &NodeId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Option<TimerHandle>> {
        let timer = self.finish_step(node_id, StepStatus::StepRejected, now)?;
        self.record(
            None,
            AuditEvent::StepRejected {
                node_id: node_id.clone(),
            },
            now,
        )?;
        Ok(timer)
    }

    /// Block the instance, and the step that caused it if any
    pub fn block(
        &mut self,
        node_id: Option<&NodeId>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Option<TimerHandle>> {
        let reason = reason.into();
        let timer = match node_id {
            Some(id) if self.step(id).is_some_and(StepState::is_active) => {
                self.finish_step(id, StepStatus::Blocked, now)?
            }
            _ => None,
        };
        self.status = InstanceStatus::Blocked;
        self.blocked_reason = Some(reason.clone());
        self.record(
            None,
            AuditEvent::Blocked {
                node_id: node_id.cloned(),
                reason,
            },
            now,
        )?;
        Ok(timer)
    }

    /// Flag an engine invariant violation. The instance is Blocked until
    /// an operator intervenes.
    pub fn flag_fault(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        self.fault = Some(reason.clone());
        self.updated_at = now;
        if self.is_terminal() {
            return;
        }
        self.status = InstanceStatus::Blocked;
        self.blocked_reason = Some(format!("fault: {reason}"));
        if !self.audit.is_sealed() {
            let _ = self.audit.append(None, AuditEvent::Fault { reason }, now);
        }
    }

    /// Move to a terminal status: withdraw every active step, record the
    /// outcome and seal the audit log. Returns the timers to cancel.
    pub fn finish(
        &mut self,
        status: InstanceStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Vec<TimerHandle>> {
        let mut timers = Vec::new();
        for node_id in std::mem::take(&mut self.current_node_ids) {
            if let Some(step) = self.step_states.get_mut(&node_id) {
                if step.is_active() {
                    step.status = StepStatus::Halted;
                    step.completed_at = Some(now);
                }
                timers.extend(step.timer.take());
            }
        }
        self.status = status;
        self.completed_at = Some(now);
        self.record(None, AuditEvent::Finished { status, reason }, now)?;
        self.audit.seal();
        Ok(timers)
    }

    /// Recompute the non-terminal status from the current steps
    pub fn refresh_status(&mut self) {
        if !self.accepts_operations() {
            return;
        }
        let current = || {
            self.current_node_ids
                .iter()
                .filter_map(|id| self.step_states.get(id))
        };
        self.status = if current().any(|s| s.escalated) {
            InstanceStatus::Escalated
        } else if current().any(StepState::has_delegations) {
            InstanceStatus::Delegated
        } else {
            InstanceStatus::Pending
        };
    }

    fn finish_step(
        &mut self,
        node_id: &NodeId,
        to: StepStatus,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Option<TimerHandle>> {
        let step = self
            .step_states
            .get_mut(node_id)
            .ok_or_else(|| WorkflowError::StepNotFound(node_id.clone()))?;
        if !step.is_active() {
            return Err(WorkflowError::InvalidStepTransition {
                node: node_id.clone(),
                from: step.status,
                to,
            });
        }
        step.status = to;
        step.completed_at = Some(now);
        step.awaiting_approvers = false;
        let timer = step.timer.take();
        self.current_node_ids.remove(node_id);
        self.updated_at = now;
        Ok(timer)
    }

    // ── Query methods ────────────────────────────────────────────────

    /// Approved, Rejected and Cancelled are final
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_blocked(&self) -> bool {
        self.status == InstanceStatus::Blocked
    }

    /// Neither terminal nor blocked
    pub fn accepts_operations(&self) -> bool {
        !self.is_terminal() && !self.is_blocked()
    }

    pub fn step(&self, node_id: &NodeId) -> Option<&StepState> {
        self.step_states.get(node_id)
    }

    pub fn step_mut(&mut self, node_id: &NodeId) -> Option<&mut StepState> {
        self.step_states.get_mut(node_id)
    }

    /// Active steps still waiting on a directory lookup that is due at `now`
    pub fn steps_awaiting_resolution(&self, now: DateTime<Utc>) -> Vec<NodeId> {
        self.current_node_ids
            .iter()
            .filter(|id| {
                self.step(id).is_some_and(|s| {
                    s.is_active()
                        && s.awaiting_approvers
                        && s.next_resolution_at.map_or(true, |at| at <= now)
                })
            })
            .cloned()
            .collect()
    }

    /// Active steps whose deadline has passed
    pub fn overdue_steps(&self, now: DateTime<Utc>) -> Vec<NodeId> {
        self.current_node_ids
            .iter()
            .filter(|id| self.step(id).is_some_and(|s| s.is_overdue(now)))
            .cloned()
            .collect()
    }

    /// Active steps waiting on a decision from `principal`
    pub fn steps_pending_for(&self, principal: &Principal) -> Vec<&NodeId> {
        self.current_node_ids
            .iter()
            .filter(|id| self.step(id).is_some_and(|s| s.awaits_decision_from(principal)))
            .collect()
    }

    pub fn audit_len(&self) -> usize {
        self.audit.len()
    }
}

// ── Instance Status ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Pending,
    Escalated,
    Delegated,
    Approved,
    Rejected,
    Cancelled,
    /// Waiting on operator intervention
    Blocked,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Escalated => "escalated",
            Self::Delegated => "delegated",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

// ── Step State ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Activated,
    Completed,
    StepRejected,
    Blocked,
    /// Withdrawn because the instance finished while the step was active
    Halted,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Activated => "activated",
            Self::Completed => "completed",
            Self::StepRejected => "step_rejected",
            Self::Blocked => "blocked",
            Self::Halted => "halted",
        };
        f.write_str(name)
    }
}

/// Runtime state of one activated node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    /// Everyone allowed to act on the step
    #[serde(default)]
    pub resolved_approvers: BTreeSet<Principal>,
    /// Slots that must be satisfied under AllRequired / AnyRejectBlocks
    #[serde(default)]
    pub required_approvers: BTreeSet<Principal>,
    /// Required slots added by escalation
    #[serde(default)]
    pub escalation_approvers: BTreeSet<Principal>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    pub activated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerHandle>,
    /// Approvers not resolved yet (directory lookup pending or failed)
    #[serde(default)]
    pub awaiting_approvers: bool,
    #[serde(default)]
    pub resolution_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_resolution_at: Option<DateTime<Utc>>,
}

impl StepState {
    pub fn activated(now: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Activated,
            resolved_approvers: BTreeSet::new(),
            required_approvers: BTreeSet::new(),
            escalation_approvers: BTreeSet::new(),
            decisions: Vec::new(),
            activated_at: now,
            completed_at: None,
            deadline: None,
            escalated: false,
            timer: None,
            awaiting_approvers: false,
            resolution_attempts: 0,
            next_resolution_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == StepStatus::Activated
    }

    /// Whether `principal` already approved, rejected or delegated
    pub fn has_final_decision(&self, principal: &Principal) -> bool {
        self.decisions
            .iter()
            .any(|d| &d.principal == principal && !d.action.is_comment())
    }

    pub fn approvals(&self) -> BTreeSet<&Principal> {
        self.principals_with(DecisionAction::Approve)
    }

    pub fn rejections(&self) -> BTreeSet<&Principal> {
        self.principals_with(DecisionAction::Reject)
    }

    /// Who `principal` handed its slot to, if anyone
    pub fn delegate_of(&self, principal: &Principal) -> Option<&Principal> {
        self.decisions
            .iter()
            .find(|d| &d.principal == principal && d.action == DecisionAction::Delegate)
            .and_then(|d| d.delegate_to.as_ref())
    }

    pub fn has_delegations(&self) -> bool {
        self.decisions
            .iter()
            .any(|d| d.action == DecisionAction::Delegate)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active()
            && !self.awaiting_approvers
            && self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn awaits_decision_from(&self, principal: &Principal) -> bool {
        self.is_active()
            && !self.awaiting_approvers
            && self.resolved_approvers.contains(principal)
            && !self.has_final_decision(principal)
    }

    fn principals_with(&self, action: DecisionAction) -> BTreeSet<&Principal> {
        self.decisions
            .iter()
            .filter(|d| d.action == action)
            .map(|d| &d.principal)
            .collect()
    }
}
