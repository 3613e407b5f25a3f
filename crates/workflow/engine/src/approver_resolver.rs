//! Approver resolver: turns approver references into principals

use crate::directory::Directory;
use crate::error::DirectoryError;
use std::collections::BTreeSet;
use std::sync::Arc;
use workflow_types::{ApproverKind, ApproverRef, Principal};

/// The principals behind a list of approver references
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedApprovers {
    /// Everyone who may act
    pub all: BTreeSet<Principal>,
    /// Principals from required refs; all of them when no ref is required
    pub required: BTreeSet<Principal>,
    /// Required refs that matched nobody in the directory
    pub empty_required: Vec<ApproverRef>,
}

impl ResolvedApprovers {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Why this set cannot complete a step, if it cannot
    pub fn shortfall(&self) -> Option<String> {
        if let Some(approver) = self.empty_required.first() {
            return Some(match approver.kind {
                ApproverKind::Manager => "required manager resolved to nobody".to_string(),
                kind => format!("required {kind} '{}' resolved to nobody", approver.value),
            });
        }
        if self.required.is_empty() {
            return Some("no required approver resolved".to_string());
        }
        None
    }
}

/// Resolves approver references through the directory
#[derive(Clone)]
pub struct ApproverResolver {
    directory: Arc<dyn Directory>,
}

impl ApproverResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Resolve one reference. `Manager` is resolved relative to `requester`.
    pub async fn resolve_ref(
        &self,
        approver: &ApproverRef,
        requester: &Principal,
    ) -> Result<BTreeSet<Principal>, DirectoryError> {
        match approver.kind {
            ApproverKind::User => Ok(BTreeSet::from([Principal::new(approver.value.clone())])),
            ApproverKind::Manager => {
                self.directory
                    .lookup(ApproverKind::Manager, requester.as_str())
                    .await
            }
            kind @ (ApproverKind::Role | ApproverKind::Department) => {
                self.directory.lookup(kind, &approver.value).await
            }
        }
    }

    /// Resolve every reference. Any directory failure fails the whole set.
    pub async fn resolve(
        &self,
        approvers: &[ApproverRef],
        requester: &Principal,
    ) -> Result<ResolvedApprovers, DirectoryError> {
        let mut resolved = ResolvedApprovers::default();
        let any_required = approvers.iter().any(|a| a.required);

        for approver in approvers {
            let principals = self.resolve_ref(approver, requester).await?;
            if approver.required && principals.is_empty() {
                resolved.empty_required.push(approver.clone());
            }
            if approver.required || !any_required {
                resolved.required.extend(principals.iter().cloned());
            }
            resolved.all.extend(principals);
        }

        tracing::debug!(
            requester = %requester,
            approvers = resolved.all.len(),
            required = resolved.required.len(),
            "Approvers resolved"
        );
        Ok(resolved)
    }
}
