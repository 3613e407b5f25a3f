use thiserror::Error;
use workflow_types::{
    NodeId, Principal, RequestInstanceId, StepStatus, ValidationError, ValueKind,
    WorkflowDefinitionId, WorkflowError,
};

/// Errors surfaced by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("Definition {id} has no version {version}")]
    DefinitionVersionNotFound { id: WorkflowDefinitionId, version: u32 },

    #[error("Definition failed validation with {} error(s)", .0.len())]
    InvalidDefinition(Vec<ValidationError>),

    #[error("Instance not found: {0}")]
    InstanceNotFound(RequestInstanceId),

    #[error("Field '{field}' is a {found}, but conditions compare it as a {expected}")]
    FieldTypeMismatch {
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Step '{0}' is not an approval step")]
    NotAnApprovalStep(NodeId),

    #[error("Step '{node_id}' is not active")]
    StepNotActive {
        node_id: NodeId,
        status: Option<StepStatus>,
    },

    #[error("Principal '{principal}' may not act on step '{node_id}'")]
    UnauthorizedPrincipal { principal: Principal, node_id: NodeId },

    #[error("Principal '{principal}' already decided step '{node_id}'")]
    DuplicateDecision { principal: Principal, node_id: NodeId },

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    #[error("Instance {0} is already finished")]
    InstanceTerminal(RequestInstanceId),

    #[error("Instance {id} is blocked: {reason}")]
    InstanceBlocked { id: RequestInstanceId, reason: String },

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Engine invariant violated: {0}")]
    Invariant(#[from] WorkflowError),
}

impl EngineError {
    /// Invariant violations are fatal for the affected instance
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}
