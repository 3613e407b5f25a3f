//! Workflow Orchestrator: the main entry point for the workflow engine
//!
//! The orchestrator owns the definition registry and the live instances.
//! It:
//! 1. Publishes workflow definitions
//! 2. Submits request instances
//! 3. Records decisions and advances instances
//! 4. Handles timeouts and escalation
//! 5. Persists snapshots and dispatches domain events
//!
//! Every instance sits behind its own lock; different instances never
//! contend. Directory lookups and notifier calls happen with no instance
//! lock held.

use crate::approver_resolver::ApproverResolver;
use crate::definition_registry::DefinitionRegistry;
use crate::directory::Directory;
use crate::error::{EngineError, EngineResult};
use crate::escalation_handler::TimeoutDecision;
use crate::notifier::Notifier;
use crate::state_machine::{Effects, RetryPolicy, StateMachine};
use crate::store::{InMemoryInstanceStore, InstanceStore};
use crate::timer::{TimeoutCallback, Timer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use workflow_types::*;

type InstanceHandle = Arc<Mutex<RequestInstance>>;

/// A new request against a published definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub definition_id: WorkflowDefinitionId,
    pub request: RequestMetadata,
    #[serde(default)]
    pub fields: Fields,
}

impl Submission {
    pub fn new(definition_id: impl Into<String>, request: RequestMetadata) -> Self {
        Self {
            definition_id: WorkflowDefinitionId::new(definition_id),
            request,
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// What a principal decided, before the engine stamps it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionInput {
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_to: Option<Principal>,
}

impl DecisionInput {
    pub fn approve() -> Self {
        Self::of(DecisionAction::Approve)
    }

    pub fn reject() -> Self {
        Self::of(DecisionAction::Reject)
    }

    pub fn delegate(to: impl Into<String>) -> Self {
        Self {
            delegate_to: Some(Principal::new(to)),
            ..Self::of(DecisionAction::Delegate)
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self::of(DecisionAction::Comment).with_comment(text)
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    fn of(action: DecisionAction) -> Self {
        Self {
            action,
            comment: None,
            delegate_to: None,
        }
    }
}

/// One entry of an approver's inbox
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub instance_id: RequestInstanceId,
    pub step_id: NodeId,
    pub step_name: String,
    pub title: String,
    pub priority: Priority,
    pub requester: Principal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub status: InstanceStatus,
}

/// The Workflow Orchestrator
pub struct WorkflowOrchestrator {
    /// Published definitions; read-mostly
    definitions: RwLock<DefinitionRegistry>,
    /// Live and finished instances, each behind its own lock
    instances: RwLock<HashMap<RequestInstanceId, InstanceHandle>>,
    state_machine: StateMachine,
    resolver: ApproverResolver,
    notifier: Arc<dyn Notifier>,
    timer: Arc<dyn Timer>,
    store: Arc<dyn InstanceStore>,
}

impl WorkflowOrchestrator {
    pub fn new(
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        timer: Arc<dyn Timer>,
    ) -> Self {
        Self {
            definitions: RwLock::new(DefinitionRegistry::new()),
            instances: RwLock::new(HashMap::new()),
            state_machine: StateMachine::new(Arc::clone(&timer), RetryPolicy::default()),
            resolver: ApproverResolver::new(directory),
            notifier,
            timer,
            store: Arc::new(InMemoryInstanceStore::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn InstanceStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.state_machine = StateMachine::new(Arc::clone(&self.timer), retry);
        self
    }

    // ── Definition Management ────────────────────────────────────────

    /// Validate and publish a definition under the next version
    pub async fn publish_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> EngineResult<Arc<WorkflowGraph>> {
        self.definitions.write().await.publish(definition)
    }

    /// A published definition; the latest version unless one is named
    pub async fn get_definition(
        &self,
        id: &WorkflowDefinitionId,
        version: Option<u32>,
    ) -> EngineResult<Arc<WorkflowGraph>> {
        let definitions = self.definitions.read().await;
        match version {
            Some(version) => definitions.get_version(id, version),
            None => definitions.get(id),
        }
    }

    pub async fn list_definitions(&self) -> Vec<Arc<WorkflowGraph>> {
        self.definitions.read().await.list()
    }

    pub async fn definition_count(&self) -> usize {
        self.definitions.read().await.count()
    }

    // ── Instance Lifecycle ───────────────────────────────────────────

    /// Create an instance of the latest definition version and advance it
    /// to its first waiting point.
    ///
    /// A field referenced by edge conditions must carry a kind at least one
    /// of those conditions compares against; other fields are stored as
    /// given.
    pub async fn submit(&self, submission: Submission) -> EngineResult<RequestInstanceId> {
        let graph = self.get_definition(&submission.definition_id, None).await?;
        check_field_kinds(&graph, &submission.fields)?;

        let now = Utc::now();
        let mut inst = RequestInstance::new(
            graph.id().clone(),
            graph.version(),
            submission.request,
            submission.fields,
            now,
        );
        let id = inst.id.clone();
        let mut fx = Effects::default();
        let result = self.state_machine.start(&mut inst, &graph, now, &mut fx);
        let result = self.settle(&mut inst, result, now);

        tracing::info!(
            instance_id = %id,
            definition = %graph.id(),
            version = graph.version(),
            status = %inst.status,
            "Request submitted"
        );
        self.persist(&inst).await;
        let handle = Arc::new(Mutex::new(inst));
        self.instances
            .write()
            .await
            .insert(id.clone(), Arc::clone(&handle));
        self.dispatch(fx).await;
        result?;

        self.drive_resolutions(&handle, now).await;
        Ok(id)
    }

    /// Record a decision by `principal` on `step_id`.
    ///
    /// Returns the instance status once the decision has been applied.
    pub async fn record_decision(
        &self,
        id: &RequestInstanceId,
        step_id: &NodeId,
        principal: Principal,
        input: DecisionInput,
    ) -> EngineResult<InstanceStatus> {
        let handle = self.handle(id).await?;
        let now = Utc::now();
        let decision = Decision {
            principal,
            action: input.action,
            timestamp: now,
            comment: input.comment,
            delegate_to: input.delegate_to,
        };
        self.mutate(&handle, now, |sm, inst, graph, fx| {
            sm.apply_decision(inst, graph, step_id, decision, now, fx)
        })
        .await?;

        // Reaching the next approval step leaves its approvers unresolved
        self.drive_resolutions(&handle, now).await;
        let status = handle.lock().await.status;
        Ok(status)
    }

    /// Cancel an instance from any non-terminal status
    pub async fn cancel(
        &self,
        id: &RequestInstanceId,
        reason: Option<String>,
    ) -> EngineResult<InstanceStatus> {
        let handle = self.handle(id).await?;
        let now = Utc::now();
        self.mutate(&handle, now, |sm, inst, _, fx| {
            sm.cancel(inst, reason, now, fx)?;
            Ok(inst.status)
        })
        .await
    }

    // ── Timeouts ─────────────────────────────────────────────────────

    /// Deliver a timeout for one step. Idempotent: a step that finished or
    /// already escalated ignores it.
    pub async fn handle_timeout(&self, id: &RequestInstanceId, step_id: &NodeId) -> EngineResult<()> {
        self.handle_timeout_at(id, step_id, Utc::now()).await
    }

    pub async fn handle_timeout_at(
        &self,
        id: &RequestInstanceId,
        step_id: &NodeId,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let handle = self.handle(id).await?;
        let (decision, requester) = {
            let inst = handle.lock().await;
            let graph = self.graph_for(&inst).await?;
            let decision = self
                .state_machine
                .timeout_decision(&inst, &graph, step_id, now);
            (decision, inst.request.requester.clone())
        };

        match decision {
            TimeoutDecision::Ignore { reason } => {
                tracing::debug!(instance_id = %id, step_id = %step_id, reason, "Timeout ignored");
                Ok(())
            }
            TimeoutDecision::Block { .. } => {
                self.mutate(&handle, now, |sm, inst, graph, fx| {
                    // Decided again under the lock; a decision may have landed
                    match sm.timeout_decision(inst, graph, step_id, now) {
                        TimeoutDecision::Block { reason } => {
                            sm.block(inst, Some(step_id), reason, now, fx)
                        }
                        _ => Ok(()),
                    }
                })
                .await
            }
            TimeoutDecision::Escalate(escalation) => {
                let resolved = self
                    .resolver
                    .resolve(&escalation.escalate_to, &requester)
                    .await
                    .map_err(|err| {
                        tracing::warn!(
                            instance_id = %id,
                            step_id = %step_id,
                            error = %err,
                            "Escalation lookup failed; the overdue sweep will retry"
                        );
                        err
                    })?;
                self.mutate(&handle, now, |sm, inst, graph, fx| {
                    sm.apply_escalation(inst, graph, step_id, resolved, now, fx)
                })
                .await
            }
        }
    }

    /// Apply a callback from the timer.
    ///
    /// A callback for a deadline the step no longer carries is stale
    /// (the deadline was re-armed or cleared) and is dropped.
    pub async fn handle_timer_fired(&self, callback: TimeoutCallback) -> EngineResult<()> {
        let handle = self.handle(&callback.instance_id).await?;
        let current = handle
            .lock()
            .await
            .step(&callback.step_id)
            .and_then(|step| step.deadline);
        if current != Some(callback.deadline) {
            tracing::debug!(
                instance_id = %callback.instance_id,
                step_id = %callback.step_id,
                "Stale timer callback dropped"
            );
            return Ok(());
        }
        let now = Utc::now().max(callback.deadline);
        self.handle_timeout_at(&callback.instance_id, &callback.step_id, now)
            .await
    }

    /// Deliver timeouts for every active step whose deadline passed.
    ///
    /// Covers callbacks that were lost or whose escalation lookup failed.
    /// Returns the number of steps visited.
    pub async fn sweep_overdue(&self, now: DateTime<Utc>) -> usize {
        let mut visited = 0;
        for (id, handle) in self.handles().await {
            let overdue = {
                let inst = handle.lock().await;
                if inst.accepts_operations() {
                    inst.overdue_steps(now)
                } else {
                    Vec::new()
                }
            };
            for step_id in overdue {
                visited += 1;
                if let Err(err) = self.handle_timeout_at(&id, &step_id, now).await {
                    tracing::warn!(instance_id = %id, step_id = %step_id, error = %err, "Overdue step not handled");
                }
            }
        }
        visited
    }

    /// Retry approver lookups that failed and are due again.
    ///
    /// Returns the number of steps attempted.
    pub async fn retry_pending_resolutions(&self, now: DateTime<Utc>) -> usize {
        let mut attempted = 0;
        for (_, handle) in self.handles().await {
            attempted += self.drive_resolutions(&handle, now).await;
        }
        attempted
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Snapshot of an instance
    pub async fn get_instance(&self, id: &RequestInstanceId) -> EngineResult<RequestInstance> {
        let handle = self.handle(id).await?;
        let inst = handle.lock().await;
        Ok(inst.clone())
    }

    /// Audit entries of an instance in sequence order
    pub async fn audit_trail(&self, id: &RequestInstanceId) -> EngineResult<Vec<AuditEntry>> {
        let handle = self.handle(id).await?;
        let inst = handle.lock().await;
        Ok(inst.audit.entries().to_vec())
    }

    /// Every open step waiting on a decision from `principal`, most urgent
    /// first
    pub async fn pending_for(&self, principal: &Principal) -> Vec<PendingApproval> {
        let mut pending = Vec::new();
        for (id, handle) in self.handles().await {
            let inst = handle.lock().await;
            if !inst.accepts_operations() {
                continue;
            }
            let steps = inst.steps_pending_for(principal);
            if steps.is_empty() {
                continue;
            }
            let graph = self.graph_for(&inst).await.ok();
            for step_id in steps {
                let step_name = graph
                    .as_ref()
                    .and_then(|g| g.node(step_id))
                    .map_or_else(|| step_id.to_string(), |node| node.name.clone());
                pending.push(PendingApproval {
                    instance_id: id.clone(),
                    step_id: step_id.clone(),
                    step_name,
                    title: inst.request.title.clone(),
                    priority: inst.request.priority,
                    requester: inst.request.requester.clone(),
                    deadline: inst.step(step_id).and_then(|s| s.deadline),
                    status: inst.status,
                });
            }
        }
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| match (a.deadline, b.deadline) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        pending
    }

    /// Total number of instances (open + terminal)
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Number of instances still open
    pub async fn open_instance_count(&self) -> usize {
        let mut open = 0;
        for (_, handle) in self.handles().await {
            if !handle.lock().await.is_terminal() {
                open += 1;
            }
        }
        open
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Load every snapshot from the store and re-arm step deadlines.
    ///
    /// Definitions must be published before restoring; instances whose
    /// definition version is unknown are still loaded but cannot advance.
    pub async fn restore(&self) -> EngineResult<usize> {
        let snapshots = self.store.load_all().await?;
        let mut instances = self.instances.write().await;
        let restored = snapshots.len();
        for mut inst in snapshots {
            self.state_machine.rearm_timers(&mut inst);
            instances.insert(inst.id.clone(), Arc::new(Mutex::new(inst)));
        }
        tracing::info!(instances = restored, "Instances restored from store");
        Ok(restored)
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn handle(&self, id: &RequestInstanceId) -> EngineResult<InstanceHandle> {
        self.instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::InstanceNotFound(id.clone()))
    }

    async fn handles(&self) -> Vec<(RequestInstanceId, InstanceHandle)> {
        self.instances
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect()
    }

    /// The definition version an instance is pinned to
    async fn graph_for(&self, inst: &RequestInstance) -> EngineResult<Arc<WorkflowGraph>> {
        self.definitions
            .read()
            .await
            .get_version(&inst.definition_id, inst.definition_version)
    }

    /// Run a state-machine operation under the instance lock, then persist
    /// the snapshot taken there and dispatch its events with the lock
    /// released. Revisions let the store drop a snapshot that arrives after
    /// a newer one.
    async fn mutate<T, F>(&self, handle: &InstanceHandle, now: DateTime<Utc>, op: F) -> EngineResult<T>
    where
        T: Send,
        F: FnOnce(&StateMachine, &mut RequestInstance, &WorkflowGraph, &mut Effects) -> EngineResult<T>
            + Send,
    {
        let mut fx = Effects::default();
        let (result, snapshot) = {
            let mut inst = handle.lock().await;
            let graph = self.graph_for(&inst).await?;
            let audit_before = inst.audit_len();
            let result = op(&self.state_machine, &mut *inst, &*graph, &mut fx);
            let result = self.settle(&mut inst, result, now);
            let faulted = matches!(&result, Err(err) if err.is_fault());
            let snapshot = if faulted || inst.audit_len() != audit_before {
                inst.revision += 1;
                Some(inst.clone())
            } else {
                None
            };
            (result, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.persist(&snapshot).await;
        }
        self.dispatch(fx).await;
        result
    }

    /// Resolve approvers for steps waiting on the directory.
    ///
    /// The lookup runs with the lock released; the outcome is applied
    /// afterwards and dropped if the step moved on meanwhile.
    async fn drive_resolutions(&self, handle: &InstanceHandle, now: DateTime<Utc>) -> usize {
        let (awaiting, requester, graph) = {
            let inst = handle.lock().await;
            if !inst.accepts_operations() {
                return 0;
            }
            let awaiting = inst.steps_awaiting_resolution(now);
            if awaiting.is_empty() {
                return 0;
            }
            let graph = match self.graph_for(&inst).await {
                Ok(graph) => graph,
                Err(err) => {
                    tracing::error!(instance_id = %inst.id, error = %err, "Definition of instance unavailable");
                    return 0;
                }
            };
            (awaiting, inst.request.requester.clone(), graph)
        };

        let mut lookups = Vec::with_capacity(awaiting.len());
        for step_id in awaiting {
            let Some(config) = graph.node(&step_id).and_then(WorkflowNode::approval_config) else {
                continue;
            };
            let lookup = self.resolver.resolve(&config.approvers, &requester).await;
            lookups.push((step_id, lookup));
        }
        let attempted = lookups.len();

        let result = self
            .mutate(handle, now, |sm, inst, graph, fx| {
                for (step_id, lookup) in lookups {
                    sm.install_approvers(inst, graph, &step_id, lookup, now, fx)?;
                }
                Ok(())
            })
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "Approver resolution not applied");
        }
        attempted
    }

    /// Flag the instance when an operation broke an engine invariant
    fn settle<T>(
        &self,
        inst: &mut RequestInstance,
        result: EngineResult<T>,
        now: DateTime<Utc>,
    ) -> EngineResult<T> {
        if let Err(err) = &result {
            if err.is_fault() {
                tracing::error!(instance_id = %inst.id, error = %err, "Engine invariant violated");
                inst.flag_fault(err.to_string(), now);
            }
        }
        result
    }

    async fn persist(&self, inst: &RequestInstance) {
        if let Err(err) = self.store.save(inst).await {
            tracing::error!(instance_id = %inst.id, error = %err, "Failed to persist instance snapshot");
        }
    }

    async fn dispatch(&self, fx: Effects) {
        for event in fx.events {
            if let Err(err) = self.notifier.notify(&event).await {
                tracing::warn!(
                    instance_id = %event.instance_id,
                    kind = %event.kind,
                    error = %err,
                    "Notification failed"
                );
            }
        }
    }
}

/// Reject a field that no condition reading it can compare: conditions on
/// other edges may expect other kinds, and those simply evaluate false
fn check_field_kinds(graph: &WorkflowGraph, fields: &Fields) -> EngineResult<()> {
    let mut expected: BTreeMap<&str, Vec<ValueKind>> = BTreeMap::new();
    for condition in graph.conditions() {
        expected
            .entry(condition.field.as_str())
            .or_default()
            .push(condition.value.kind());
    }
    for (field, kinds) in expected {
        let Some(value) = fields.get(field) else {
            continue;
        };
        let found = value.kind();
        if !kinds.contains(&found) {
            return Err(EngineError::FieldTypeMismatch {
                field: field.to_string(),
                expected: kinds[0],
                found,
            });
        }
    }
    Ok(())
}
