//! Approval workflow domain types
//!
//! An approval workflow is a versioned, directed acyclic graph of typed
//! steps. A request submitted against a definition becomes a
//! [`RequestInstance`] that the engine drives to a terminal outcome.
//!
//! - [`WorkflowDefinition`]: the immutable, versioned step graph
//! - [`WorkflowEdge`] / [`Condition`]: transitions and their branch predicates
//! - [`RequestInstance`] / [`StepState`]: runtime state of one request
//! - [`Decision`]: an approver's append-only action on a step
//! - [`AuditLog`]: the ordered, sealable record of every transition
//! - [`DomainEvent`]: what the engine hands to the notifier

#![deny(unsafe_code)]

pub mod audit;
pub mod decision;
pub mod definition;
pub mod edge;
pub mod error;
pub mod event;
pub mod graph;
pub mod instance;
pub mod validation;
pub mod value;

pub use audit::*;
pub use decision::*;
pub use definition::*;
pub use edge::*;
pub use error::*;
pub use event::*;
pub use graph::*;
pub use instance::*;
pub use validation::*;
pub use value::*;
