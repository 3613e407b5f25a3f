//! Approval workflow execution engine
//!
//! The engine walks request instances through published workflow
//! definitions. It resolves who may approve each step, collects their
//! decisions, enforces deadlines with a single escalation stage, and keeps
//! an append-only audit log per instance.
//!
//! # Key Principle
//!
//! **No I/O runs under an instance lock.**
//!
//! All I/O goes through the collaborator traits ([`Directory`],
//! [`Notifier`], [`Timer`], [`InstanceStore`]); the state machine only
//! records what has to happen. Snapshots are cloned under the lock and
//! saved after it is released; each carries a revision so the store can
//! drop one that arrives after a newer snapshot of the same instance.
//!
//! # Architecture
//!
//! The [`WorkflowOrchestrator`] composes specialized components:
//!
//! - [`DefinitionRegistry`]: Validated, versioned definitions
//! - [`ConditionEvaluator`]: Picks the outgoing edge for a node
//! - [`ApproverResolver`]: Turns approver refs into principals
//! - [`PolicyEvaluator`]: Combines decisions into a step outcome
//! - [`StateMachine`]: Every transition of an instance
//! - [`EscalationHandler`]: Decides what an expired deadline means
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use workflow_engine::*;
//! use workflow_types::*;
//!
//! # tokio_test::block_on(async {
//! let directory = Arc::new(StaticDirectory::new().with_manager("alice", "bob"));
//! let orchestrator = WorkflowOrchestrator::new(
//!     directory,
//!     Arc::new(TracingNotifier),
//!     Arc::new(RecordingTimer::new()),
//! );
//!
//! let mut def = WorkflowDefinition::new("Expense").with_id("expense");
//! def.add_node(WorkflowNode::start("start")).unwrap();
//! def.add_node(WorkflowNode::approval(
//!     "manager",
//!     "Manager approval",
//!     ApprovalConfig::new(vec![ApproverRef::manager()], DecisionPolicy::AllRequired),
//! ))
//! .unwrap();
//! def.add_node(WorkflowNode::end("end")).unwrap();
//! def.add_edge(WorkflowEdge::new("start", "manager")).unwrap();
//! def.add_edge(WorkflowEdge::new("manager", "end")).unwrap();
//! orchestrator.publish_definition(def).await.unwrap();
//!
//! let id = orchestrator
//!     .submit(Submission::new("expense", RequestMetadata::new("alice")))
//!     .await
//!     .unwrap();
//! let status = orchestrator
//!     .record_decision(&id, &NodeId::new("manager"), Principal::new("bob"), DecisionInput::approve())
//!     .await
//!     .unwrap();
//! assert_eq!(status, InstanceStatus::Approved);
//! # });
//! ```

#![deny(unsafe_code)]

pub mod approver_resolver;
pub mod condition_evaluator;
pub mod definition_registry;
pub mod directory;
pub mod error;
pub mod escalation_handler;
pub mod notifier;
pub mod orchestrator;
pub mod policy_evaluator;
pub mod state_machine;
pub mod store;
pub mod timer;

// Re-export main types
pub use approver_resolver::{ApproverResolver, ResolvedApprovers};
pub use condition_evaluator::ConditionEvaluator;
pub use definition_registry::DefinitionRegistry;
pub use directory::{Directory, StaticDirectory};
pub use error::{DirectoryError, EngineError, EngineResult, NotifyError, StoreError};
pub use escalation_handler::{EscalationHandler, TimeoutDecision};
pub use notifier::{Notifier, RecordingNotifier, TracingNotifier};
pub use orchestrator::{DecisionInput, PendingApproval, Submission, WorkflowOrchestrator};
pub use policy_evaluator::{PolicyEvaluator, PolicyOutcome};
pub use state_machine::{Effects, RetryPolicy, StateMachine};
pub use store::{InMemoryInstanceStore, InstanceStore, StoreResult};
pub use timer::{RecordingTimer, TimeoutCallback, Timer, TokioTimer};
