//! End-to-end test: approver sets that cannot complete a step.
//!
//! Verifies that:
//! - A required ref that matches nobody blocks the step, even when an
//!   optional ref still resolves
//! - Escalation approvers with an empty required ref block the step
//! - Quorum counts required approvers only, delegated slots included
//! - Publish refuses quorums optional approvers would have to fill
//! - Publish refuses deadlines too far out to represent

use crate::support::*;
use workflow_engine::*;
use workflow_types::*;

// ---------------------------------------------------------------------------
// Required refs resolving to nobody
// ---------------------------------------------------------------------------

#[tokio::test]
async fn required_role_with_no_members_blocks_despite_optional_user() {
    let engine = engine();
    let config = ApprovalConfig::new(
        vec![ApproverRef::role("ghost"), ApproverRef::user("u").optional()],
        DecisionPolicy::AllRequired,
    );
    let id = start(&engine, single_step("audit", config)).await;

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Blocked);
    let step = inst.step(&node("step")).unwrap();
    assert_eq!(step.status, StepStatus::Blocked);
    assert!(step.required_approvers.is_empty());
    assert!(inst.blocked_reason.unwrap().contains("'ghost'"));

    assert_eq!(engine.notifier.count(DomainEventKind::Blocked), 1);
    assert_eq!(engine.notifier.count(DomainEventKind::ActionRequired), 0);
    assert!(engine.orch.pending_for(&who("u")).await.is_empty());
    assert!(engine.timer.active().is_empty());
}

#[tokio::test]
async fn escalation_to_empty_required_role_blocks() {
    let engine = engine();
    let config = manager_step().with_timeout(3600).with_escalation(Escalation::new(
        1800,
        vec![ApproverRef::role("ghost"), ApproverRef::user("backup").optional()],
    ));
    let id = start(&engine, single_step("travel", config)).await;

    let armed = engine.timer.active();
    engine
        .orch
        .handle_timer_fired(armed[0].clone())
        .await
        .unwrap();

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Blocked);
    let step = inst.step(&node("step")).unwrap();
    assert!(!step.escalated);
    assert!(!step.resolved_approvers.contains(&who("backup")));
    assert!(!audit_kinds(&engine, &id).await.contains(&"step_escalated"));
    assert_eq!(engine.notifier.count(DomainEventKind::Escalated), 0);
}

// ---------------------------------------------------------------------------
// Quorum over required approvers
// ---------------------------------------------------------------------------

fn finance_with_observers(quorum: u32) -> ApprovalConfig {
    ApprovalConfig::new(
        vec![
            ApproverRef::role("finance"),
            ApproverRef::user("obs1").optional(),
            ApproverRef::user("obs2").optional(),
        ],
        DecisionPolicy::Quorum(quorum),
    )
}

#[tokio::test]
async fn quorum_ignores_optional_approvals() {
    let engine = engine();
    let id = start(&engine, single_step("budget", finance_with_observers(2))).await;

    for observer in ["obs1", "obs2"] {
        let status = decide(&engine, &id, "step", observer, DecisionInput::approve())
            .await
            .unwrap();
        assert_eq!(status, InstanceStatus::Pending);
    }
    let status = decide(&engine, &id, "step", "fay", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Pending);

    let status = decide(&engine, &id, "step", "finn", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Approved);
}

#[tokio::test]
async fn quorum_counts_a_delegated_slot() {
    let engine = engine();
    let id = start(&engine, single_step("budget", finance_with_observers(2))).await;

    decide(&engine, &id, "step", "fay", DecisionInput::delegate("zed"))
        .await
        .unwrap();
    decide(&engine, &id, "step", "zed", DecisionInput::approve())
        .await
        .unwrap();
    let status = decide(&engine, &id, "step", "finn", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Approved);
}

#[tokio::test]
async fn quorum_unreachable_once_required_slots_reject() {
    let engine = engine();
    let id = start(&engine, single_step("budget", finance_with_observers(3))).await;

    decide(&engine, &id, "step", "obs1", DecisionInput::approve())
        .await
        .unwrap();
    let status = decide(&engine, &id, "step", "fay", DecisionInput::reject())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Rejected);
}

#[tokio::test]
async fn publish_refuses_quorum_only_optional_users_could_reach() {
    let engine = engine();
    let config = ApprovalConfig::new(
        vec![
            ApproverRef::user("a"),
            ApproverRef::user("b").optional(),
            ApproverRef::user("c").optional(),
        ],
        DecisionPolicy::Quorum(2),
    );

    let result = engine.orch.publish_definition(single_step("audit", config)).await;
    let Err(EngineError::InvalidDefinition(errors)) = result else {
        panic!("expected an invalid definition, got {result:?}");
    };
    assert!(errors.contains(&ValidationError::InvalidQuorum {
        node: node("step"),
        quorum: 2,
        available: 1,
    }));
    assert_eq!(engine.orch.definition_count().await, 0);
}

// ---------------------------------------------------------------------------
// Deadline range
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_refuses_unrepresentable_deadlines() {
    let engine = engine();
    let config = manager_step()
        .with_timeout(u64::MAX)
        .with_escalation(Escalation::new(
            i64::MAX as u64,
            vec![ApproverRef::role("director")],
        ));

    let result = engine.orch.publish_definition(single_step("travel", config)).await;
    let Err(EngineError::InvalidDefinition(errors)) = result else {
        panic!("expected an invalid definition, got {result:?}");
    };
    let out_of_range: Vec<u64> = errors
        .iter()
        .filter_map(|e| match e {
            ValidationError::DeadlineOutOfRange { secs, .. } => Some(*secs),
            _ => None,
        })
        .collect();
    assert_eq!(out_of_range, vec![u64::MAX, i64::MAX as u64]);

    let submitted = engine
        .orch
        .submit(Submission::new("travel", request()))
        .await;
    assert!(matches!(submitted, Err(EngineError::DefinitionNotFound(_))));
}

#[tokio::test]
async fn longest_allowed_deadline_is_armed() {
    let engine = engine();
    let id = start(
        &engine,
        single_step("travel", manager_step().with_timeout(MAX_DEADLINE_SECS)),
    )
    .await;

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Pending);
    assert!(inst.step(&node("step")).unwrap().deadline.is_some());
    assert_eq!(engine.timer.active().len(), 1);
}
