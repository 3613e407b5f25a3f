//! End-to-end test: instance lifecycle, persistence and concurrency.
//!
//! Verifies that:
//! - Timeouts on completed steps are no-ops
//! - Cancel is final and withdraws every timer
//! - Empty approver sets block instead of approving
//! - Snapshots round-trip and restore re-arms deadlines
//! - Instances and decisions proceed safely in parallel

use crate::support::*;
use std::sync::Arc;
use workflow_engine::*;
use workflow_types::*;

#[tokio::test]
async fn timeout_on_completed_step_is_a_noop_twice() {
    let engine = engine();
    let id = start(
        &engine,
        two_steps(
            "travel",
            manager_step().with_timeout(60),
            manager_step().with_timeout(60),
        ),
    )
    .await;
    decide(&engine, &id, "first", "morgan", DecisionInput::approve())
        .await
        .unwrap();
    let before = engine.orch.get_instance(&id).await.unwrap();
    let deadline = before.step(&node("first")).unwrap().deadline.unwrap();

    for _ in 0..2 {
        engine
            .orch
            .handle_timeout_at(&id, &node("first"), deadline)
            .await
            .unwrap();
    }
    assert_eq!(engine.orch.get_instance(&id).await.unwrap(), before);
}

#[tokio::test]
async fn cancel_withdraws_timers_and_seals_the_log() {
    let engine = engine();
    let id = start(
        &engine,
        single_step("travel", manager_step().with_timeout(3600)),
    )
    .await;
    assert_eq!(engine.timer.active().len(), 1);

    let status = engine
        .orch
        .cancel(&id, Some("trip called off".into()))
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Cancelled);
    assert!(engine.timer.active().is_empty());

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert!(inst.audit.is_sealed());
    assert!(inst.completed_at.is_some());
    assert!(matches!(
        inst.audit.entries().last().map(|e| &e.event),
        Some(AuditEvent::Finished {
            status: InstanceStatus::Cancelled,
            ..
        })
    ));

    assert!(matches!(
        engine.orch.cancel(&id, None).await,
        Err(EngineError::InstanceTerminal(_))
    ));
    // A late timer callback finds nothing to do
    engine
        .orch
        .handle_timeout(&id, &node("step"))
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_approver_set_blocks_and_can_be_cancelled() {
    let engine = engine();
    let id = start(
        &engine,
        single_step(
            "orphan",
            ApprovalConfig::new(vec![ApproverRef::role("nobody")], DecisionPolicy::AllRequired),
        ),
    )
    .await;

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Blocked);
    assert_eq!(inst.step(&node("step")).unwrap().status, StepStatus::Blocked);

    let status = engine.orch.cancel(&id, None).await.unwrap();
    assert_eq!(status, InstanceStatus::Cancelled);
}

#[tokio::test]
async fn manager_of_unknown_requester_blocks() {
    let engine = engine();
    let def = single_step("travel", manager_step());
    engine.orch.publish_definition(def).await.unwrap();
    let id = engine
        .orch
        .submit(Submission::new("travel", RequestMetadata::new("nobody-knows-me")))
        .await
        .unwrap();
    assert_eq!(
        engine.orch.get_instance(&id).await.unwrap().status,
        InstanceStatus::Blocked
    );
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_round_trips_step_states_and_status() {
    let engine = engine();
    let id = start(
        &engine,
        single_step("budget", ApprovalConfig::new(vec![ApproverRef::role("finance")], DecisionPolicy::Quorum(2))),
    )
    .await;
    decide(&engine, &id, "step", "fay", DecisionInput::approve().with_comment("fine"))
        .await
        .unwrap();

    let raw = engine.store.raw(&id).await.unwrap();
    let decoded: RequestInstance = serde_json::from_str(&raw).unwrap();
    let live = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(decoded, live);
    assert_eq!(decoded.status, InstanceStatus::Pending);
    assert_eq!(decoded.step(&node("step")).unwrap().decisions.len(), 1);
}

#[tokio::test]
async fn restore_rearms_deadlines() {
    let engine = engine();
    let def = single_step("travel", manager_step().with_timeout(3600));
    let id = start(&engine, def.clone()).await;
    let deadline = engine.timer.active()[0].deadline;

    let timer = Arc::new(RecordingTimer::new());
    let restored = WorkflowOrchestrator::new(
        Arc::new(directory()),
        Arc::new(RecordingNotifier::new()),
        timer.clone(),
    )
    .with_store(engine.store.clone());
    restored.publish_definition(def).await.unwrap();

    assert_eq!(restored.restore().await.unwrap(), 1);
    let armed = timer.active();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].instance_id, id);
    assert_eq!(armed[0].deadline, deadline);

    let status = restored
        .record_decision(&id, &node("step"), who("morgan"), DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Approved);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn instances_proceed_in_parallel() {
    let engine = engine();
    engine
        .orch
        .publish_definition(single_step("travel", manager_step()))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..16 {
        ids.push(
            engine
                .orch
                .submit(Submission::new("travel", request()))
                .await
                .unwrap(),
        );
    }

    let mut tasks = Vec::new();
    for id in ids.clone() {
        let orch = Arc::clone(&engine.orch);
        tasks.push(tokio::spawn(async move {
            orch.record_decision(&id, &node("step"), who("morgan"), DecisionInput::approve())
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), InstanceStatus::Approved);
    }
    assert_eq!(engine.orch.open_instance_count().await, 0);
    assert_eq!(engine.notifier.count(DomainEventKind::Completed), ids.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decisions_on_one_step_advance_once() {
    let engine = engine();
    let id = start(
        &engine,
        two_steps(
            "budget",
            ApprovalConfig::new(vec![ApproverRef::role("finance")], DecisionPolicy::Quorum(2)),
            manager_step(),
        ),
    )
    .await;

    let mut tasks = Vec::new();
    for principal in ["fay", "finn", "fred"] {
        let orch = Arc::clone(&engine.orch);
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            orch.record_decision(&id, &node("first"), who(principal), DecisionInput::approve())
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), InstanceStatus::Pending);
    }

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert!(inst.fault.is_none());
    assert_eq!(inst.step(&node("first")).unwrap().status, StepStatus::Completed);
    assert_eq!(inst.step(&node("first")).unwrap().decisions.len(), 3);
    assert!(inst.step(&node("second")).unwrap().is_active());
    assert_eq!(
        inst.audit
            .entries()
            .iter()
            .filter(|e| matches!(&e.event, AuditEvent::NodeActivated { node_id, .. } if node_id == &node("second")))
            .count(),
        1
    );

    // Sequence numbers stay gap-free under contention
    let sequences: Vec<u64> = inst.audit.entries().iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (sequences[0]..sequences[0] + sequences.len() as u64).collect();
    assert_eq!(sequences, expected);
}
