//! Policy evaluator: combines the decisions on a step into an outcome
//!
//! Required slots are the principals resolved from required refs. A
//! principal who delegates hands its slot to the delegate; the slot is
//! satisfied once the end of the delegation chain approves. After
//! escalation the escalation approvers form an alternative set of slots:
//! the step also completes once all of them approve.
//!
//! Quorum counts slots, not raw approvals: optional approvers may act but
//! do not count toward `n`, and a delegated slot counts once its delegate
//! approves. Escalation approvers join the counted slots.

use std::collections::BTreeSet;
use workflow_types::{DecisionPolicy, Principal, StepState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Threshold not reached, still reachable
    Pending,
    Satisfied,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Satisfied,
    /// The current holder has not decided yet
    Open,
    /// Rejected, or lost in a delegation loop
    Closed,
}

pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn evaluate(policy: &DecisionPolicy, step: &StepState) -> PolicyOutcome {
        match policy {
            DecisionPolicy::AllRequired | DecisionPolicy::AnyRejectBlocks => {
                if !step.rejections().is_empty() {
                    return PolicyOutcome::Rejected;
                }
                let original = Self::all_slots_satisfied(step, &step.required_approvers);
                let escalation = step.escalated
                    && Self::all_slots_satisfied(step, &step.escalation_approvers);
                if original || escalation {
                    PolicyOutcome::Satisfied
                } else {
                    PolicyOutcome::Pending
                }
            }
            DecisionPolicy::Quorum(n) => {
                let needed = *n as usize;
                let mut slots = step.required_approvers.clone();
                if step.escalated {
                    slots.extend(step.escalation_approvers.iter().cloned());
                }
                let (mut satisfied, mut open) = (0, 0);
                for slot in &slots {
                    match Self::slot_state(step, slot) {
                        SlotState::Satisfied => satisfied += 1,
                        SlotState::Open => open += 1,
                        SlotState::Closed => {}
                    }
                }
                if satisfied >= needed {
                    PolicyOutcome::Satisfied
                } else if satisfied + open < needed {
                    PolicyOutcome::Rejected
                } else {
                    PolicyOutcome::Pending
                }
            }
        }
    }

    /// Whether the slot held by `principal` is satisfied, following
    /// delegations transitively
    pub fn slot_satisfied(step: &StepState, principal: &Principal) -> bool {
        Self::slot_state(step, principal) == SlotState::Satisfied
    }

    fn slot_state(step: &StepState, principal: &Principal) -> SlotState {
        let approvals = step.approvals();
        let mut visited = BTreeSet::new();
        let mut holder = principal;
        while visited.insert(holder) {
            if approvals.contains(holder) {
                return SlotState::Satisfied;
            }
            match step.delegate_of(holder) {
                Some(delegate) => holder = delegate,
                None if step.has_final_decision(holder) => return SlotState::Closed,
                None => return SlotState::Open,
            }
        }
        // Delegation loop: nobody at the end of the chain can approve
        SlotState::Closed
    }

    fn all_slots_satisfied(step: &StepState, slots: &BTreeSet<Principal>) -> bool {
        !slots.is_empty() && slots.iter().all(|p| Self::slot_satisfied(step, p))
    }
}
