//! End-to-end test: conditional routing.
//!
//! Verifies that:
//! - A conditional edge whose condition fails falls through to the default
//! - Notification and condition nodes pass straight through
//! - A node with no matching edge blocks the instance

use crate::support::*;
use workflow_engine::*;
use workflow_types::*;

/// start → notify → [amount > 1000] finance → end
///                  [default]                → end
fn expense_routing() -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("Expense").with_id("expense");
    def.add_node(WorkflowNode::start("start")).unwrap();
    def.add_node(WorkflowNode::notification(
        "notify",
        "Acknowledge",
        "expense-received",
    ))
    .unwrap();
    def.add_node(WorkflowNode::approval(
        "finance",
        "Finance review",
        ApprovalConfig::new(vec![ApproverRef::role("finance")], DecisionPolicy::Quorum(1)),
    ))
    .unwrap();
    def.add_node(WorkflowNode::end("end")).unwrap();
    def.add_edge(WorkflowEdge::new("start", "notify")).unwrap();
    def.add_edge(WorkflowEdge::conditional(
        "notify",
        "finance",
        Condition::greater_than("amount", 1000.0),
    ))
    .unwrap();
    def.add_edge(WorkflowEdge::new("notify", "end").with_id("notify-default"))
        .unwrap();
    def.add_edge(WorkflowEdge::new("finance", "end")).unwrap();
    def
}

async fn submit_amount(engine: &Engine, amount: f64) -> RequestInstanceId {
    engine
        .orch
        .submit(Submission::new("expense", request()).with_field("amount", amount))
        .await
        .unwrap()
}

#[tokio::test]
async fn small_amount_skips_approval() {
    let engine = engine();
    engine
        .orch
        .publish_definition(expense_routing())
        .await
        .unwrap();
    let id = submit_amount(&engine, 500.0).await;

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Approved);
    assert!(inst.step(&node("finance")).is_none());
    assert_eq!(inst.step(&node("end")).unwrap().status, StepStatus::Completed);

    let trail = engine.orch.audit_trail(&id).await.unwrap();
    assert!(trail.iter().any(|entry| matches!(
        &entry.event,
        AuditEvent::EdgeTaken { edge_id, .. } if edge_id == &EdgeId::new("notify-default")
    )));
    assert!(!trail.iter().any(|entry| matches!(
        &entry.event,
        AuditEvent::NodeActivated { node_type: NodeType::Approval, .. }
    )));

    let notifications: Vec<_> = engine
        .notifier
        .events()
        .into_iter()
        .filter(|e| e.kind == DomainEventKind::Notification)
        .collect();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].template.as_deref(), Some("expense-received"));
    assert_eq!(engine.notifier.kinds().last(), Some(&DomainEventKind::Completed));
}

#[tokio::test]
async fn large_amount_waits_for_finance() {
    let engine = engine();
    engine
        .orch
        .publish_definition(expense_routing())
        .await
        .unwrap();
    let id = submit_amount(&engine, 1500.0).await;

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Pending);
    assert_eq!(inst.current_node_ids.len(), 1);
    assert!(inst.current_node_ids.contains(&node("finance")));
    assert_eq!(engine.orch.pending_for(&who("finn")).await.len(), 1);

    let status = decide(&engine, &id, "finance", "finn", DecisionInput::approve())
        .await
        .unwrap();
    assert_eq!(status, InstanceStatus::Approved);
}

#[tokio::test]
async fn boundary_amount_is_not_greater() {
    let engine = engine();
    engine
        .orch
        .publish_definition(expense_routing())
        .await
        .unwrap();
    let id = submit_amount(&engine, 1000.0).await;
    assert_eq!(
        engine.orch.get_instance(&id).await.unwrap().status,
        InstanceStatus::Approved
    );
}

#[tokio::test]
async fn condition_node_routes_on_department() {
    let engine = engine();
    let mut def = WorkflowDefinition::new("Contract").with_id("contract");
    def.add_node(WorkflowNode::start("start")).unwrap();
    def.add_node(WorkflowNode::condition("route", "Route by department"))
        .unwrap();
    def.add_node(WorkflowNode::approval(
        "legal",
        "Legal review",
        ApprovalConfig::new(vec![ApproverRef::department("legal")], DecisionPolicy::AllRequired),
    ))
    .unwrap();
    def.add_node(WorkflowNode::end("end")).unwrap();
    def.add_edge(WorkflowEdge::new("start", "route")).unwrap();
    def.add_edge(WorkflowEdge::conditional(
        "route",
        "legal",
        Condition::equals("department", "legal"),
    ))
    .unwrap();
    def.add_edge(WorkflowEdge::new("route", "end")).unwrap();
    def.add_edge(WorkflowEdge::new("legal", "end")).unwrap();
    engine.orch.publish_definition(def).await.unwrap();

    let legal = engine
        .orch
        .submit(Submission::new("contract", request()).with_field("department", "legal"))
        .await
        .unwrap();
    let other = engine
        .orch
        .submit(Submission::new("contract", request()).with_field("department", "sales"))
        .await
        .unwrap();

    let legal = engine.orch.get_instance(&legal).await.unwrap();
    assert_eq!(legal.status, InstanceStatus::Pending);
    assert!(legal
        .step(&node("legal"))
        .unwrap()
        .resolved_approvers
        .contains(&who("lee")));
    assert_eq!(
        engine.orch.get_instance(&other).await.unwrap().status,
        InstanceStatus::Approved
    );
}

#[tokio::test]
async fn no_matching_edge_blocks() {
    let engine = engine();
    let mut def = WorkflowDefinition::new("Strict").with_id("strict");
    def.add_node(WorkflowNode::start("start")).unwrap();
    def.add_node(WorkflowNode::end("end")).unwrap();
    def.add_edge(WorkflowEdge::conditional(
        "start",
        "end",
        Condition::equals("kind", "travel"),
    ))
    .unwrap();
    engine.orch.publish_definition(def).await.unwrap();

    // A missing field never satisfies a condition
    let id = engine
        .orch
        .submit(Submission::new("strict", request()))
        .await
        .unwrap();

    let inst = engine.orch.get_instance(&id).await.unwrap();
    assert_eq!(inst.status, InstanceStatus::Blocked);
    assert!(inst.blocked_reason.unwrap().contains("start"));
    assert_eq!(engine.notifier.count(DomainEventKind::Blocked), 1);
}
