//! Workflow edges: condition-guarded transitions
//!
//! Edges connect nodes in the workflow graph. An edge with no conditions
//! is the unconditional (default) edge of its source node; an edge with
//! conditions is taken only when every condition holds against the
//! request fields. Conditioned edges are tried in declaration order and
//! the first full match wins; the default edge is tried last.

use crate::{NodeId, TypedValue};
use serde::{Deserialize, Serialize};

/// Unique identifier for an edge within a definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An edge in the workflow graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: EdgeId,
    /// Source node
    #[serde(alias = "from")]
    pub source: NodeId,
    /// Target node
    #[serde(alias = "to")]
    pub target: NodeId,
    /// ANDed together; empty means unconditional
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Human-readable label for this transition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

impl WorkflowEdge {
    /// Create an unconditional edge, identified as `source->target`
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = NodeId::new(source);
        let target = NodeId::new(target);
        Self {
            id: EdgeId::new(format!("{source}->{target}")),
            source,
            target,
            conditions: Vec::new(),
            label: String::new(),
        }
    }

    /// Create an edge taken only when `condition` holds
    pub fn conditional(
        source: impl Into<String>,
        target: impl Into<String>,
        condition: Condition,
    ) -> Self {
        Self::new(source, target).and(condition)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = EdgeId::new(id);
        self
    }

    /// Add another condition that must also hold
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn is_unconditional(&self) -> bool {
        self.conditions.is_empty()
    }
}

// ── Conditions ───────────────────────────────────────────────────────

/// A predicate over one request field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: TypedValue,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<TypedValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, value)
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Self::new(field, ConditionOperator::LessThan, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, ConditionOperator::Contains, TypedValue::String(value.into()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    GreaterThan,
    LessThan,
    Contains,
}

impl ConditionOperator {
    /// Whether the operator is defined for operands of this kind
    pub fn accepts(&self, kind: crate::ValueKind) -> bool {
        use crate::ValueKind;
        match self {
            Self::Equals => true,
            Self::GreaterThan | Self::LessThan => {
                matches!(kind, ValueKind::Number | ValueKind::Date)
            }
            Self::Contains => kind == ValueKind::String,
        }
    }
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Equals => "equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Contains => "contains",
        };
        f.write_str(name)
    }
}
