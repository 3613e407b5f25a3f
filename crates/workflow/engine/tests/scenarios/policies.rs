//! End-to-end test: decision policies and delegation.
//!
//! Verifies that:
//! - Quorum(2) over three approvers completes on the second approval
//! - Decisions after the threshold are recorded without effect
//! - AnyRejectBlocks rejects the instance on the first reject
//! - Delegation hands the slot over and both decisions are audited

use crate::support::*;
use workflow_engine::*;
use workflow_types::*;

fn finance(policy: DecisionPolicy) -> ApprovalConfig {
    ApprovalConfig::new(vec![ApproverRef::role("finance")], policy)
}

#[tokio::test]
async fn quorum_completes_on_second_approval_and_records_the_third() {
    let engine = engine();
    let id = start(
        &engine,
        two_steps("budget", finance(DecisionPolicy::Quorum(2)), manager_step()),
    )
    .await;

    let status = decide(&engine, &id, "first", "fay", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Pending);
    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert!(inst.step(&node("first")).unwrap().is_active());

    decide(&engine, &id, "first", "finn", DecisionInput::approve())
        .await
        .unwrap();
    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.step(&node("first")).unwrap().status, StepStatus::Completed);
    assert!(inst.current_node_ids.contains(&node("second")));
    assert!(inst
        .step(&node("second"))
        .unwrap()
        .resolved_approvers
        .contains(&who("morgan")));

    // The third approval lands on a completed step
    let status = decide(&engine, &id, "first", "fred", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Pending);

    let inst = engine.orch.get_instance(&id).await.unwrap();
    let first = inst.step(&node("first")).unwrap();
    assert_eq!(first.status, StepStatus::Completed);
    assert_eq!(first.decisions.len(), 3);
    assert_eq!(inst.audit.for_node(&node("first")).filter(|e| e.event.kind() == "step_completed").count(), 1);
    assert!(inst.audit.entries().iter().any(|e| {
        e.actor == Some(who("fred")) && matches!(e.event, AuditEvent::DecisionRecorded { .. })
    }));
    assert_eq!(engine.notifier.count(DomainEventKind::Approved), 1);
}

#[tokio::test]
async fn quorum_becomes_unreachable() {
    let engine = engine();
    let id = start(
        &engine,
        single_step("budget", finance(DecisionPolicy::Quorum(2))),
    )
    .await;

    decide(&engine, &id, "step", "fay", DecisionInput::reject())
        .await
        .unwrap();
    let status = decide(&engine, &id, "step", "finn", DecisionInput::reject())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Rejected);
}

#[tokio::test]
async fn any_reject_blocks_on_first_reject() {
    let engine = engine();
    let id = start(
        &engine,
        single_step("budget", finance(DecisionPolicy::AnyRejectBlocks)),
    )
    .await;

    decide(&engine, &id, "step", "fay", DecisionInput::approve())
        .await
        .unwrap();
    let status = decide(
        &engine,
        &id,
        "step",
        "finn",
        DecisionInput::reject().with_comment("over budget"),
    )
    .await
    .unwrap();
    assert_eq!(status, InstanceStatus::Rejected);

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.step(&node("step")).unwrap().status, StepStatus::StepRejected);
    assert!(inst.audit.is_sealed());

    let late = decide(&engine, &id, "step", "fred", DecisionInput::approve()).await;
    assert!(matches!(late, Err(EngineError::InstanceTerminal(_))));
}

#[tokio::test]
async fn all_required_waits_for_every_approver() {
    let engine = engine();
    let id = start(
        &engine,
        single_step("budget", finance(DecisionPolicy::AllRequired)),
    )
    .await;

    for principal in ["fay", "finn"] {
        let status = decide(&engine, &id, "step", principal, DecisionInput::approve())
            .await
            .unwrap();
        assert_eq!(status, InstanceStatus::Pending);
    }
    let status = decide(&engine, &id, "step", "fred", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Approved);
}

#[tokio::test]
async fn duplicate_decision_is_refused_but_comments_are_not() {
    let engine = engine();
    let id = start(
        &engine,
        single_step("budget", finance(DecisionPolicy::AllRequired)),
    )
    .await;

    decide(&engine, &id, "step", "fay", DecisionInput::approve())
        .await
        .unwrap();
    let before = engine.orch.audit_trail(&id).await.unwrap().len();

    let again = decide(&engine, &id, "step", "fay", DecisionInput::reject()).await;
    assert!(matches!(again, Err(EngineError::DuplicateDecision { .. })));
    assert_eq!(engine.orch.audit_trail(&id).await.unwrap().len(), before);

    decide(&engine, &id, "step", "fay", DecisionInput::comment("receipts attached"))
        .await
        .unwrap();
    assert_eq!(engine.orch.audit_trail(&id).await.unwrap().len(), before + 1);
}

#[tokio::test]
async fn delegate_then_approve_completes_the_step() {
    let engine = engine();
    let id = start(&engine, single_step("travel", manager_step())).await;

    let status = decide(&engine, &id, "step", "morgan", DecisionInput::delegate("diana"))
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Delegated);
    assert_eq!(engine.orch.pending_for(&who("diana")).await.len(), 1);
    assert!(engine.orch.pending_for(&who("morgan")).await.is_empty());

    let status = decide(&engine, &id, "step", "diana", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Approved);

    let trail = engine.orch.audit_trail(&id).await.unwrap();
    let decisions: Vec<_> = trail
        .iter()
        .filter_map(|entry| match &entry.event {
            AuditEvent::DecisionRecorded {
                action, delegate_to, ..
            } => Some((entry.actor.clone(), *action, delegate_to.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        decisions,
        vec![
            (Some(who("morgan")), DecisionAction::Delegate, Some(who("diana"))),
            (Some(who("diana")), DecisionAction::Approve, None),
        ]
    );
    assert_eq!(engine.notifier.count(DomainEventKind::Delegated), 1);
}

#[tokio::test]
async fn unauthorized_principal_is_refused() {
    let engine = engine();
    let id = start(&engine, single_step("travel", manager_step())).await;
    let before = engine.orch.get_instance(&id).await.unwrap();

    let result = decide(&engine, &id, "step", "alice", DecisionInput::approve()).await;
    assert!(matches!(
        result,
        Err(EngineError::UnauthorizedPrincipal { ref principal, .. }) if principal == &who("alice")
    ));
    assert_eq!(engine.orch.get_instance(&id).await.unwrap(), before);
}
