//! Principals and the decisions they record on approval steps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated identity able to act on a step
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// What a principal did on a step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
    Delegate,
    Comment,
}

impl DecisionAction {
    /// Comments never count toward a step outcome and may be repeated
    pub fn is_comment(&self) -> bool {
        matches!(self, Self::Comment)
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Delegate => "delegate",
            Self::Comment => "comment",
        };
        f.write_str(name)
    }
}

/// A decision recorded on a step. Decisions are append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub principal: Principal,
    pub action: DecisionAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_to: Option<Principal>,
}

impl Decision {
    pub fn new(principal: Principal, action: DecisionAction) -> Self {
        Self {
            principal,
            action,
            timestamp: Utc::now(),
            comment: None,
            delegate_to: None,
        }
    }

    pub fn approve(principal: impl Into<String>) -> Self {
        Self::new(Principal::new(principal), DecisionAction::Approve)
    }

    pub fn reject(principal: impl Into<String>) -> Self {
        Self::new(Principal::new(principal), DecisionAction::Reject)
    }

    pub fn delegate(principal: impl Into<String>, to: impl Into<String>) -> Self {
        let mut decision = Self::new(Principal::new(principal), DecisionAction::Delegate);
        decision.delegate_to = Some(Principal::new(to));
        decision
    }

    pub fn comment(principal: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Principal::new(principal), DecisionAction::Comment).with_comment(text)
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
