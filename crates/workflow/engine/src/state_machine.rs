//! State machine: every transition of a request instance
//!
//! All methods run with the instance lock held. They mutate the
//! instance, register or cancel timers (non-blocking), and collect the
//! domain events to dispatch into [`Effects`]. Directory lookups happen
//! outside the lock: a step that needs approvers is left with
//! `awaiting_approvers` set and the orchestrator feeds the lookup result
//! back through [`StateMachine::install_approvers`].

use crate::approver_resolver::ResolvedApprovers;
use crate::condition_evaluator::ConditionEvaluator;
use crate::error::{DirectoryError, EngineError, EngineResult};
use crate::escalation_handler::{EscalationHandler, TimeoutDecision};
use crate::policy_evaluator::{PolicyEvaluator, PolicyOutcome};
use crate::timer::Timer;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use workflow_types::*;

/// Backoff for approver lookups that failed on directory unavailability
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: doubling from the base, capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let secs = self
            .base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_secs)
            .min(MAX_DEADLINE_SECS);
        Duration::seconds(secs as i64)
    }
}

/// `now + secs`, or `None` when the instant is not representable
pub fn deadline_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_add_signed(Duration::try_seconds(secs)?)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: 5,
            max_secs: 300,
        }
    }
}

/// Domain events produced under the lock, dispatched after release
#[derive(Debug, Default)]
pub struct Effects {
    pub events: Vec<DomainEvent>,
}

impl Effects {
    pub fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub struct StateMachine {
    timer: Arc<dyn Timer>,
    escalation: EscalationHandler,
    retry: RetryPolicy,
}

impl StateMachine {
    pub fn new(timer: Arc<dyn Timer>, retry: RetryPolicy) -> Self {
        Self {
            timer,
            escalation: EscalationHandler::new(),
            retry,
        }
    }

    /// Record the submission and walk from Start to the first waiting point
    pub fn start(
        &self,
        inst: &mut RequestInstance,
        graph: &WorkflowGraph,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<()> {
        inst.record(
            Some(inst.request.requester.clone()),
            AuditEvent::Submitted {
                definition_id: graph.id().to_string(),
                definition_version: graph.version(),
            },
            now,
        )?;
        fx.emit(DomainEvent::new(DomainEventKind::Submitted, inst.id.clone(), now));

        let start = graph.start();
        inst.activate_step(&start.id, NodeType::Start, now)?;
        inst.complete_step(&start.id, now)?;
        self.advance(inst, graph, start.id.clone(), now, fx)
    }

    /// Follow edges out of the completed node `from`.
    ///
    /// Control-flow nodes complete on the spot; the walk stops at an
    /// approval step, an end node, or a node with no matching edge.
    pub fn advance(
        &self,
        inst: &mut RequestInstance,
        graph: &WorkflowGraph,
        from: NodeId,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<()> {
        let mut from = from;
        loop {
            // Cancelled or blocked meanwhile: activate nothing further
            if !inst.accepts_operations() {
                return Ok(());
            }

            let Some(edge) = ConditionEvaluator::select_edge(graph.outgoing(&from), &inst.fields)
            else {
                let reason = format!("no outgoing edge of '{from}' matches the request");
                return self.block(inst, None, reason, now, fx);
            };
            inst.record(
                None,
                AuditEvent::EdgeTaken {
                    edge_id: edge.id.clone(),
                    from: from.clone(),
                    to: edge.target.clone(),
                },
                now,
            )?;

            let target = edge.target.clone();
            let node = graph
                .node(&target)
                .ok_or_else(|| WorkflowError::NodeNotFound(target.clone()))?;
            let step = inst.activate_step(&target, node.node_type(), now)?;

            match &node.kind {
                NodeKind::Approval(_) => {
                    step.awaiting_approvers = true;
                    return Ok(());
                }
                NodeKind::End => {
                    inst.complete_step(&target, now)?;
                    return self.finish(inst, InstanceStatus::Approved, None, now, fx);
                }
                NodeKind::Notification(config) => {
                    inst.record(
                        None,
                        AuditEvent::NotificationForwarded {
                            node_id: target.clone(),
                            template: config.template.clone(),
                        },
                        now,
                    )?;
                    fx.emit(
                        DomainEvent::new(DomainEventKind::Notification, inst.id.clone(), now)
                            .with_node(target.clone())
                            .with_recipients([inst.request.requester.clone()])
                            .with_template(config.template.clone()),
                    );
                    inst.complete_step(&target, now)?;
                }
                NodeKind::Condition | NodeKind::Start => {
                    inst.complete_step(&target, now)?;
                }
            }
            from = target;
        }
    }

    /// Apply the outcome of an approver lookup for `node_id`.
    ///
    /// A stale result (step finished or already resolved meanwhile) is
    /// dropped.
    pub fn install_approvers(
        &self,
        inst: &mut RequestInstance,
        graph: &WorkflowGraph,
        node_id: &NodeId,
        lookup: Result<ResolvedApprovers, DirectoryError>,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<()> {
        if !inst.accepts_operations() {
            return Ok(());
        }
        match inst.step(node_id) {
            Some(step) if step.is_active() && step.awaiting_approvers => {}
            _ => return Ok(()),
        }
        let config = approval_config(graph, node_id)?;

        let resolved = match lookup {
            Ok(resolved) => resolved,
            Err(err) => {
                let step = step_mut(inst, node_id)?;
                step.resolution_attempts += 1;
                let attempt = step.resolution_attempts;
                let retry_at = now
                    .checked_add_signed(self.retry.delay(attempt))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                step.next_resolution_at = Some(retry_at);
                tracing::warn!(
                    instance_id = %inst.id,
                    step_id = %node_id,
                    attempt,
                    error = %err,
                    "Approver resolution failed, will retry"
                );
                inst.record(
                    None,
                    AuditEvent::ApproverResolutionFailed {
                        node_id: node_id.clone(),
                        attempt,
                        error: err.to_string(),
                        retry_at,
                    },
                    now,
                )?;
                return Ok(());
            }
        };

        if resolved.is_empty() {
            let reason = format!("approver set of step '{node_id}' resolved empty");
            return self.block(inst, Some(node_id), reason, now, fx);
        }
        if let Some(shortfall) = resolved.shortfall() {
            let reason = format!("step '{node_id}' cannot complete: {shortfall}");
            return self.block(inst, Some(node_id), reason, now, fx);
        }
        if let DecisionPolicy::Quorum(n) = config.decision_policy {
            if resolved.required.len() < n as usize {
                let reason = format!(
                    "step '{node_id}' needs a quorum of {n} but only {} required approver(s) resolved",
                    resolved.required.len()
                );
                return self.block(inst, Some(node_id), reason, now, fx);
            }
        }
        let deadline = match config.initial_deadline_secs() {
            Some(secs) => match deadline_after(now, secs) {
                Some(at) => Some(at),
                None => {
                    let reason = format!("deadline of {secs}s for step '{node_id}' is out of range");
                    return self.block(inst, Some(node_id), reason, now, fx);
                }
            },
            None => None,
        };

        let instance_id = inst.id.clone();
        let step = step_mut(inst, node_id)?;
        step.resolved_approvers = resolved.all.clone();
        step.required_approvers = resolved.required.clone();
        step.awaiting_approvers = false;
        step.next_resolution_at = None;
        if let Some(at) = deadline {
            step.deadline = Some(at);
            step.timer = Some(self.timer.register_deadline(&instance_id, node_id, at));
        }

        inst.record(
            None,
            AuditEvent::ApproversResolved {
                node_id: node_id.clone(),
                approvers: resolved.all.iter().cloned().collect(),
                required: resolved.required.iter().cloned().collect(),
            },
            now,
        )?;
        if let Some(deadline) = deadline {
            inst.record(
                None,
                AuditEvent::DeadlineSet {
                    node_id: node_id.clone(),
                    deadline,
                },
                now,
            )?;
        }
        fx.emit(
            DomainEvent::new(DomainEventKind::ActionRequired, instance_id, now)
                .with_node(node_id.clone())
                .with_recipients(resolved.all),
        );
        inst.refresh_status();
        Ok(())
    }

    /// Append a decision and apply its effect on the step
    pub fn apply_decision(
        &self,
        inst: &mut RequestInstance,
        graph: &WorkflowGraph,
        node_id: &NodeId,
        decision: Decision,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<()> {
        ensure_open(inst)?;
        let config = approval_config(graph, node_id)?;
        let step = inst.step(node_id).ok_or_else(|| EngineError::StepNotActive {
            node_id: node_id.clone(),
            status: None,
        })?;

        let principal = decision.principal.clone();
        if !step.resolved_approvers.contains(&principal) {
            return Err(EngineError::UnauthorizedPrincipal {
                principal,
                node_id: node_id.clone(),
            });
        }
        let after_threshold = match step.status {
            StepStatus::Activated => false,
            StepStatus::Completed => true,
            other => {
                return Err(EngineError::StepNotActive {
                    node_id: node_id.clone(),
                    status: Some(other),
                })
            }
        };
        if !decision.action.is_comment() && step.has_final_decision(&principal) {
            return Err(EngineError::DuplicateDecision {
                principal,
                node_id: node_id.clone(),
            });
        }
        let delegate = match (decision.action, &decision.delegate_to) {
            (DecisionAction::Delegate, Some(to)) if to == &principal => {
                return Err(EngineError::InvalidDecision(
                    "a principal cannot delegate to itself".into(),
                ))
            }
            (DecisionAction::Delegate, Some(to)) => Some(to.clone()),
            (DecisionAction::Delegate, None) => {
                return Err(EngineError::InvalidDecision(
                    "delegate requires a delegate_to principal".into(),
                ))
            }
            _ => None,
        };

        let action = decision.action;
        inst.record(
            Some(principal.clone()),
            AuditEvent::DecisionRecorded {
                node_id: node_id.clone(),
                action,
                comment: decision.comment.clone(),
                delegate_to: delegate.clone(),
            },
            now,
        )?;
        let step = step_mut(inst, node_id)?;
        step.decisions.push(decision);

        if after_threshold {
            tracing::debug!(
                instance_id = %inst.id,
                step_id = %node_id,
                principal = %principal,
                "Decision recorded after the step completed"
            );
            return Ok(());
        }

        match action {
            DecisionAction::Comment => {}
            DecisionAction::Delegate => {
                if let Some(to) = delegate {
                    step.resolved_approvers.insert(to.clone());
                    fx.emit(
                        DomainEvent::new(DomainEventKind::Delegated, inst.id.clone(), now)
                            .with_node(node_id.clone())
                            .with_recipients([to])
                            .with_detail(format!("delegated by {principal}")),
                    );
                }
            }
            DecisionAction::Approve | DecisionAction::Reject => {
                match PolicyEvaluator::evaluate(&config.decision_policy, step) {
                    PolicyOutcome::Pending => {}
                    PolicyOutcome::Satisfied => {
                        let timer = inst.complete_step(node_id, now)?;
                        self.cancel_timers(timer);
                        fx.emit(
                            DomainEvent::new(DomainEventKind::Approved, inst.id.clone(), now)
                                .with_node(node_id.clone())
                                .with_recipients([inst.request.requester.clone()]),
                        );
                        tracing::info!(instance_id = %inst.id, step_id = %node_id, "Step approved");
                        self.advance(inst, graph, node_id.clone(), now, fx)?;
                    }
                    PolicyOutcome::Rejected => {
                        let timer = inst.reject_step(node_id, now)?;
                        self.cancel_timers(timer);
                        fx.emit(
                            DomainEvent::new(DomainEventKind::Rejected, inst.id.clone(), now)
                                .with_node(node_id.clone())
                                .with_recipients([inst.request.requester.clone()]),
                        );
                        tracing::info!(instance_id = %inst.id, step_id = %node_id, "Step rejected");
                        let reason = format!("step '{node_id}' rejected");
                        self.finish(inst, InstanceStatus::Rejected, Some(reason), now, fx)?;
                    }
                }
            }
        }

        inst.refresh_status();
        Ok(())
    }

    /// What a timeout for `node_id` means right now
    pub fn timeout_decision(
        &self,
        inst: &RequestInstance,
        graph: &WorkflowGraph,
        node_id: &NodeId,
        now: DateTime<Utc>,
    ) -> TimeoutDecision {
        self.escalation.on_timeout(inst, graph, node_id, now)
    }

    /// Bring the resolved escalation approvers into the step.
    ///
    /// Re-checks the timeout decision first; if the step moved on while
    /// the lookup ran, nothing happens.
    pub fn apply_escalation(
        &self,
        inst: &mut RequestInstance,
        graph: &WorkflowGraph,
        node_id: &NodeId,
        resolved: ResolvedApprovers,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<()> {
        let TimeoutDecision::Escalate(escalation) = self.timeout_decision(inst, graph, node_id, now)
        else {
            return Ok(());
        };
        if resolved.is_empty() {
            let reason = format!("escalation approvers of step '{node_id}' resolved empty");
            return self.block(inst, Some(node_id), reason, now, fx);
        }
        if let Some(shortfall) = resolved.shortfall() {
            let reason = format!("escalation of step '{node_id}' cannot complete: {shortfall}");
            return self.block(inst, Some(node_id), reason, now, fx);
        }
        let Some(deadline) = deadline_after(now, escalation.after_secs) else {
            let reason = format!(
                "escalation deadline of {}s for step '{node_id}' is out of range",
                escalation.after_secs
            );
            return self.block(inst, Some(node_id), reason, now, fx);
        };

        let instance_id = inst.id.clone();
        let step = step_mut(inst, node_id)?;
        let originals = step.resolved_approvers.clone();
        let added: Vec<Principal> = resolved.all.difference(&originals).cloned().collect();

        step.resolved_approvers.extend(resolved.all.iter().cloned());
        step.escalation_approvers = resolved.required.clone();
        step.escalated = true;
        let old_timer = step.timer.take();
        step.deadline = Some(deadline);
        step.timer = Some(self.timer.register_deadline(&instance_id, node_id, deadline));
        self.cancel_timers(old_timer);

        inst.record(
            None,
            AuditEvent::StepEscalated {
                node_id: node_id.clone(),
                added,
                deadline: Some(deadline),
            },
            now,
        )?;
        inst.refresh_status();

        let mut recipients = resolved.all;
        if escalation.notify_original_approvers {
            recipients.extend(originals);
        }
        fx.emit(
            DomainEvent::new(DomainEventKind::Escalated, instance_id.clone(), now)
                .with_node(node_id.clone())
                .with_recipients(recipients),
        );
        tracing::info!(instance_id = %instance_id, step_id = %node_id, "Step escalated");
        Ok(())
    }

    /// Block the instance (and step) pending operator intervention
    pub fn block(
        &self,
        inst: &mut RequestInstance,
        node_id: Option<&NodeId>,
        reason: String,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<()> {
        tracing::warn!(instance_id = %inst.id, reason = %reason, "Instance blocked");
        let timer = inst.block(node_id, reason.clone(), now)?;
        self.cancel_timers(timer);

        let mut event = DomainEvent::new(DomainEventKind::Blocked, inst.id.clone(), now)
            .with_recipients([inst.request.requester.clone()])
            .with_detail(reason);
        if let Some(node_id) = node_id {
            event = event.with_node(node_id.clone());
        }
        fx.emit(event);
        Ok(())
    }

    /// Cancel from any non-terminal status, including Blocked
    pub fn cancel(
        &self,
        inst: &mut RequestInstance,
        reason: Option<String>,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<()> {
        if inst.is_terminal() {
            return Err(EngineError::InstanceTerminal(inst.id.clone()));
        }
        let timers = inst.finish(InstanceStatus::Cancelled, reason.clone(), now)?;
        for timer in timers {
            self.timer.cancel(&timer);
        }
        let mut event = DomainEvent::new(DomainEventKind::Cancelled, inst.id.clone(), now)
            .with_recipients([inst.request.requester.clone()]);
        if let Some(reason) = reason {
            event = event.with_detail(reason);
        }
        fx.emit(event);
        tracing::info!(instance_id = %inst.id, "Instance cancelled");
        Ok(())
    }

    /// Register fresh timers for every active step with a deadline.
    ///
    /// Used when instances are loaded back from a snapshot store.
    pub fn rearm_timers(&self, inst: &mut RequestInstance) {
        if !inst.accepts_operations() {
            return;
        }
        let instance_id = inst.id.clone();
        for node_id in inst.current_node_ids.clone() {
            if let Some(step) = inst.step_mut(&node_id) {
                if let (true, Some(deadline)) = (step.is_active(), step.deadline) {
                    step.timer = Some(self.timer.register_deadline(&instance_id, &node_id, deadline));
                }
            }
        }
    }

    fn finish(
        &self,
        inst: &mut RequestInstance,
        status: InstanceStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<()> {
        let timers = inst.finish(status, reason, now)?;
        for timer in timers {
            self.timer.cancel(&timer);
        }
        fx.emit(
            DomainEvent::new(DomainEventKind::Completed, inst.id.clone(), now)
                .with_recipients([inst.request.requester.clone()])
                .with_detail(status.to_string()),
        );
        tracing::info!(instance_id = %inst.id, status = %status, "Instance finished");
        Ok(())
    }

    fn cancel_timers(&self, timer: Option<TimerHandle>) {
        if let Some(timer) = timer {
            self.timer.cancel(&timer);
        }
    }
}

/// Decisions and timeouts apply only to open instances
pub fn ensure_open(inst: &RequestInstance) -> EngineResult<()> {
    if inst.is_terminal() {
        return Err(EngineError::InstanceTerminal(inst.id.clone()));
    }
    if inst.is_blocked() {
        return Err(EngineError::InstanceBlocked {
            id: inst.id.clone(),
            reason: inst.blocked_reason.clone().unwrap_or_default(),
        });
    }
    Ok(())
}

fn approval_config<'g>(graph: &'g WorkflowGraph, node_id: &NodeId) -> EngineResult<&'g ApprovalConfig> {
    graph
        .node(node_id)
        .and_then(WorkflowNode::approval_config)
        .ok_or_else(|| EngineError::NotAnApprovalStep(node_id.clone()))
}

fn step_mut<'i>(inst: &'i mut RequestInstance, node_id: &NodeId) -> EngineResult<&'i mut StepState> {
    inst.step_mut(node_id)
        .ok_or_else(|| WorkflowError::StepNotFound(node_id.clone()).into())
}
