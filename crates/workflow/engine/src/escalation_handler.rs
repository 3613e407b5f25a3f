//! Escalation handler: decides what an expired deadline means
//!
//! The handler does NOT take action. It inspects a step and returns a
//! [`TimeoutDecision`] for the state machine to apply.

use chrono::{DateTime, Utc};
use workflow_types::*;

/// What to do with a timeout callback for one step
#[derive(Clone, Debug, PartialEq)]
pub enum TimeoutDecision {
    /// Nothing to do: the step is finished, still resolving, or the
    /// callback is a duplicate of one already applied
    Ignore { reason: &'static str },
    /// Bring in the escalation approvers
    Escalate(Escalation),
    /// The step cannot progress any more
    Block { reason: String },
}

/// Handles timeout detection and escalation decisions
#[derive(Clone, Debug, Default)]
pub struct EscalationHandler;

impl EscalationHandler {
    pub fn new() -> Self {
        Self
    }

    /// Decide how a timeout for `node_id` at `now` applies to `instance`.
    ///
    /// A step escalates at most once. Once escalated, only a deadline that
    /// has actually passed blocks it; earlier callbacks are duplicates of
    /// the one that caused the escalation.
    pub fn on_timeout(
        &self,
        instance: &RequestInstance,
        graph: &WorkflowGraph,
        node_id: &NodeId,
        now: DateTime<Utc>,
    ) -> TimeoutDecision {
        if !instance.accepts_operations() {
            return TimeoutDecision::Ignore {
                reason: "instance no longer accepts operations",
            };
        }
        let Some(step) = instance.step(node_id) else {
            return TimeoutDecision::Ignore {
                reason: "step never activated",
            };
        };
        if !step.is_active() {
            return TimeoutDecision::Ignore {
                reason: "step already finished",
            };
        }
        if step.awaiting_approvers {
            return TimeoutDecision::Ignore {
                reason: "approvers not resolved yet",
            };
        }
        let Some(config) = graph.node(node_id).and_then(WorkflowNode::approval_config) else {
            return TimeoutDecision::Ignore {
                reason: "not an approval step",
            };
        };

        if step.escalated {
            return if step.deadline.is_some_and(|deadline| now >= deadline) {
                TimeoutDecision::Block {
                    reason: format!("step '{node_id}' still undecided after escalation"),
                }
            } else {
                TimeoutDecision::Ignore {
                    reason: "step already escalated",
                }
            };
        }

        match &config.escalation {
            Some(escalation) => TimeoutDecision::Escalate(escalation.clone()),
            None => TimeoutDecision::Block {
                reason: format!("deadline of step '{node_id}' expired with no escalation configured"),
            },
        }
    }

    /// Steps of `instance` whose deadline has passed at `now`
    pub fn overdue(&self, instance: &RequestInstance, now: DateTime<Utc>) -> Vec<NodeId> {
        if !instance.accepts_operations() {
            return Vec::new();
        }
        instance.overdue_steps(now)
    }
}
