use crate::{EdgeId, NodeId, RequestInstanceId, StepStatus, ValidationError};
use thiserror::Error;

/// Errors raised while building definitions or mutating instance state
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    #[error("Duplicate edge id: {0}")]
    DuplicateEdgeId(EdgeId),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Definition is invalid ({} problem(s))", .0.len())]
    Invalid(Vec<ValidationError>),

    #[error("Node '{0}' was already activated for this instance")]
    NodeReactivated(NodeId),

    #[error("No step state for node '{0}'")]
    StepNotFound(NodeId),

    #[error("Step '{node}' cannot move from {from} to {to}")]
    InvalidStepTransition {
        node: NodeId,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Audit log of instance {0} is sealed")]
    AuditLogSealed(RequestInstanceId),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
