//! Condition evaluator: pure predicates over request fields
//!
//! Kinds never coerce. A comparison between values of different kinds,
//! or an operator applied to a kind it is not defined for, is simply
//! false. A missing field is false for every operator.

use workflow_types::{Condition, ConditionOperator, Fields, TypedValue, WorkflowEdge};

/// Evaluates edge conditions against request fields
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluate a single condition
    pub fn evaluate(condition: &Condition, fields: &Fields) -> bool {
        let Some(actual) = fields.get(&condition.field) else {
            return false;
        };
        let expected = &condition.value;

        match condition.operator {
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::GreaterThan => match (actual, expected) {
                (TypedValue::Number(a), TypedValue::Number(b)) => a > b,
                (TypedValue::Date(a), TypedValue::Date(b)) => a > b,
                _ => false,
            },
            ConditionOperator::LessThan => match (actual, expected) {
                (TypedValue::Number(a), TypedValue::Number(b)) => a < b,
                (TypedValue::Date(a), TypedValue::Date(b)) => a < b,
                _ => false,
            },
            ConditionOperator::Contains => match (actual, expected) {
                (TypedValue::String(haystack), TypedValue::String(needle)) => {
                    haystack.contains(needle.as_str())
                }
                _ => false,
            },
        }
    }

    /// All conditions hold. An empty list always holds.
    pub fn evaluate_all(conditions: &[Condition], fields: &Fields) -> bool {
        conditions.iter().all(|c| Self::evaluate(c, fields))
    }

    /// Pick the edge to take out of a node.
    ///
    /// Conditioned edges are tried in order and the first full match wins;
    /// the unconditional edge, if any, is the fallback.
    pub fn select_edge<'a>(
        edges: impl IntoIterator<Item = &'a WorkflowEdge>,
        fields: &Fields,
    ) -> Option<&'a WorkflowEdge> {
        let mut fallback = None;
        for edge in edges {
            if edge.is_unconditional() {
                fallback = fallback.or(Some(edge));
            } else if Self::evaluate_all(&edge.conditions, fields) {
                return Some(edge);
            }
        }
        fallback
    }
}
