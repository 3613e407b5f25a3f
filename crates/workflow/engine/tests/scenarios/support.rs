//! Shared fixtures: an engine wired to recording collaborators.

use std::sync::Arc;
use workflow_engine::*;
use workflow_types::*;

pub struct Engine {
    pub orch: Arc<WorkflowOrchestrator>,
    pub notifier: Arc<RecordingNotifier>,
    pub timer: Arc<RecordingTimer>,
    pub directory: Arc<StaticDirectory>,
    pub store: Arc<InMemoryInstanceStore>,
}

/// alice reports to morgan; dana directs; fay, finn and fred sit in the
/// finance role; lee is the legal department
pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_manager("alice", "morgan")
        .with_role("director", ["dana"])
        .with_role("finance", ["fay", "finn", "fred"])
        .with_department("legal", ["lee"])
}

pub fn engine() -> Engine {
    let directory = Arc::new(directory());
    let notifier = Arc::new(RecordingNotifier::new());
    let timer = Arc::new(RecordingTimer::new());
    let store = Arc::new(InMemoryInstanceStore::new());
    let orch = WorkflowOrchestrator::new(directory.clone(), notifier.clone(), timer.clone())
        .with_store(store.clone());
    Engine {
        orch: Arc::new(orch),
        notifier,
        timer,
        directory,
        store,
    }
}

pub fn node(id: &str) -> NodeId {
    NodeId::new(id)
}

pub fn who(id: &str) -> Principal {
    Principal::new(id)
}

pub fn request() -> RequestMetadata {
    RequestMetadata::new("alice")
        .with_title("Conference travel")
        .with_priority(Priority::High)
}

/// start → `step` → end
pub fn single_step(id: &str, config: ApprovalConfig) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new(id).with_id(id);
    def.add_node(WorkflowNode::start("start")).unwrap();
    def.add_node(WorkflowNode::approval("step", "Approval", config))
        .unwrap();
    def.add_node(WorkflowNode::end("end")).unwrap();
    def.add_edge(WorkflowEdge::new("start", "step")).unwrap();
    def.add_edge(WorkflowEdge::new("step", "end")).unwrap();
    def
}

/// start → `first` → `second` → end; keeps the instance open after the
/// first step completes
pub fn two_steps(id: &str, first: ApprovalConfig, second: ApprovalConfig) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new(id).with_id(id);
    def.add_node(WorkflowNode::start("start")).unwrap();
    def.add_node(WorkflowNode::approval("first", "First approval", first))
        .unwrap();
    def.add_node(WorkflowNode::approval("second", "Second approval", second))
        .unwrap();
    def.add_node(WorkflowNode::end("end")).unwrap();
    def.add_edge(WorkflowEdge::new("start", "first")).unwrap();
    def.add_edge(WorkflowEdge::new("first", "second")).unwrap();
    def.add_edge(WorkflowEdge::new("second", "end")).unwrap();
    def
}

pub fn manager_step() -> ApprovalConfig {
    ApprovalConfig::new(vec![ApproverRef::manager()], DecisionPolicy::AllRequired)
}

pub async fn start(engine: &Engine, def: WorkflowDefinition) -> RequestInstanceId {
    let id = def.id.to_string();
    engine.orch.publish_definition(def).await.unwrap();
    engine
        .orch
        .submit(Submission::new(id, request()))
        .await
        .unwrap()
}

pub async fn decide(
    engine: &Engine,
    id: &RequestInstanceId,
    step: &str,
    principal: &str,
    input: DecisionInput,
) -> EngineResult<InstanceStatus> {
    engine
        .orch
        .record_decision(id, &node(step), who(principal), input)
        .await
}

pub async fn audit_kinds(engine: &Engine, id: &RequestInstanceId) -> Vec<&'static str> {
    engine
        .orch
        .audit_trail(id)
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.event.kind())
        .collect()
}
