//! End-to-end test: deadlines, escalation and blocking.
//!
//! Verifies that:
//! - An expired manager step escalates once to the director
//! - The director's approval completes the step
//! - Stale and duplicate timer callbacks are no-ops
//! - A step that cannot escalate blocks the instance

use crate::support::*;
use chrono::Duration;
use workflow_engine::*;
use workflow_types::*;

fn escalating_step() -> ApprovalConfig {
    manager_step()
        .with_timeout(3600)
        .with_escalation(
            Escalation::new(1800, vec![ApproverRef::role("director")])
                .notifying_original_approvers(),
        )
}

// ---------------------------------------------------------------------------
// Manager → Director
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manager_timeout_escalates_to_director_who_approves() {
    let engine = engine();
    let id = start(&engine, single_step("travel", escalating_step())).await;

    let inst = engine.orch.get_instance(&id).await.unwrap();
    let first_deadline = inst.step(&node("step")).unwrap().deadline.unwrap();
    let armed = engine.timer.active();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].deadline, first_deadline);

    // The timer fires
    engine
        .orch
        .handle_timer_fired(armed[0].clone())
        .await
        .unwrap();

    let inst = engine.orch.get_instance(&id).await.unwrap();
    let step = inst.step(&node("step")).unwrap();
    assert_eq!(inst.status, InstanceStatus::Escalated);
    assert!(step.escalated);
    assert!(step.resolved_approvers.contains(&who("morgan")));
    assert!(step.resolved_approvers.contains(&who("dana")));
    assert_eq!(step.deadline, Some(first_deadline + Duration::seconds(1800)));

    // The first deadline's timer is gone, the re-armed one is live
    let armed = engine.timer.active();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].deadline, first_deadline + Duration::seconds(1800));

    // Escalation notifies the director and the original approver
    let escalated: Vec<_> = engine
        .notifier
        .events()
        .into_iter()
        .filter(|e| e.kind == DomainEventKind::Escalated)
        .collect();
    assert_eq!(escalated.len(), 1);
    assert!(escalated[0].recipients.contains(&who("dana")));
    assert!(escalated[0].recipients.contains(&who("morgan")));

    let status = decide(&engine, &id, "step", "dana", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Approved);

    let kinds = audit_kinds(&engine, &id).await;
    assert!(kinds.contains(&"step_escalated"));
    assert_eq!(kinds.last(), Some(&"finished"));
    assert!(engine.timer.active().is_empty());
}

#[tokio::test]
async fn original_approver_can_still_decide_after_escalation() {
    let engine = engine();
    let id = start(&engine, single_step("travel", escalating_step())).await;
    let callback = engine.timer.active().remove(0);
    engine.orch.handle_timer_fired(callback).await.unwrap();

    let status = decide(&engine, &id, "step", "morgan", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Approved);
}

#[tokio::test]
async fn duplicate_and_stale_callbacks_are_ignored() {
    let engine = engine();
    let id = start(&engine, single_step("travel", escalating_step())).await;
    let callback = engine.timer.active().remove(0);

    engine.orch.handle_timer_fired(callback.clone()).await.unwrap();
    let after_first = engine.orch.get_instance(&id).await.unwrap();

    // At-least-once delivery: the same callback arrives again
    engine.orch.handle_timer_fired(callback.clone()).await.unwrap();
    // A direct timeout at the old deadline is a duplicate too
    engine
        .orch
        .handle_timeout_at(&id, &node("step"), callback.deadline)
        .await
        .unwrap();

    assert_eq!(engine.orch.get_instance(&id).await.unwrap(), after_first);
    assert_eq!(engine.notifier.count(DomainEventKind::Escalated), 1);
}

#[tokio::test]
async fn escalated_step_blocks_when_second_deadline_passes() {
    let engine = engine();
    let id = start(&engine, single_step("travel", escalating_step())).await;
    engine
        .orch
        .handle_timer_fired(engine.timer.active().remove(0))
        .await
        .unwrap();

    engine
        .orch
        .handle_timer_fired(engine.timer.active().remove(0))
        .await
        .unwrap();

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Blocked);
    assert_eq!(inst.step(&node("step")).unwrap().status, StepStatus::Blocked);
    assert!(inst.blocked_reason.is_some());
    assert!(engine.timer.active().is_empty());

    let result = decide(&engine, &id, "step", "dana", DecisionInput::approve()).await;
    assert!(matches!(result, Err(EngineError::InstanceBlocked { .. })));
}

// ---------------------------------------------------------------------------
// No escalation, directory outage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_without_escalation_blocks() {
    let engine = engine();
    let id = start(
        &engine,
        single_step("travel", manager_step().with_timeout(60)),
    )
    .await;

    let deadline = engine.timer.active()[0].deadline;
    engine
        .orch
        .handle_timeout_at(&id, &node("step"), deadline)
        .await
        .unwrap();

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Blocked);
    assert_eq!(engine.notifier.count(DomainEventKind::Blocked), 1);
}

#[tokio::test]
async fn escalation_lookup_outage_is_picked_up_by_the_sweep() {
    let engine = engine();
    let id = start(&engine, single_step("travel", escalating_step())).await;
    let deadline = engine.timer.active()[0].deadline;

    engine.directory.set_available(false);
    let result = engine
        .orch
        .handle_timeout_at(&id, &node("step"), deadline)
        .await;
    assert!(matches!(result, Err(EngineError::Directory(_))));
    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert!(!inst.step(&node("step")).unwrap().escalated);
    assert_eq!(inst.status, InstanceStatus::Pending);

    engine.directory.set_available(true);
    assert_eq!(engine.orch.sweep_overdue(deadline).await, 1);
    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert!(inst.step(&node("step")).unwrap().escalated);
    assert_eq!(inst.status, InstanceStatus::Escalated);

    // Nothing is overdue any more
    assert_eq!(engine.orch.sweep_overdue(deadline).await, 0);
}
