//! Directory collaborator: who holds a role, sits in a department, or
//! manages whom

use crate::error::DirectoryError;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use workflow_types::{ApproverKind, Principal};

/// Looks up principals for an approver reference.
///
/// For `Manager` the value is the principal whose manager is wanted.
/// `DirectoryError::Unavailable` is retryable.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn lookup(
        &self,
        kind: ApproverKind,
        value: &str,
    ) -> Result<BTreeSet<Principal>, DirectoryError>;
}

/// Directory backed by fixed maps, typically loaded from configuration
#[derive(Debug)]
pub struct StaticDirectory {
    roles: HashMap<String, BTreeSet<Principal>>,
    departments: HashMap<String, BTreeSet<Principal>>,
    managers: HashMap<Principal, Principal>,
    available: AtomicBool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self {
            roles: HashMap::new(),
            departments: HashMap::new(),
            managers: HashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_role<I, S>(mut self, role: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .entry(role.into())
            .or_default()
            .extend(members.into_iter().map(Principal::new));
        self
    }

    pub fn with_department<I, S>(mut self, department: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.departments
            .entry(department.into())
            .or_default()
            .extend(members.into_iter().map(Principal::new));
        self
    }

    pub fn with_manager(mut self, employee: impl Into<String>, manager: impl Into<String>) -> Self {
        self.managers
            .insert(Principal::new(employee), Principal::new(manager));
        self
    }

    /// Simulate an outage: while unavailable every lookup fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn lookup(
        &self,
        kind: ApproverKind,
        value: &str,
    ) -> Result<BTreeSet<Principal>, DirectoryError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(
                "static directory switched off".into(),
            ));
        }

        let found = match kind {
            ApproverKind::User => BTreeSet::from([Principal::new(value)]),
            ApproverKind::Role => self.roles.get(value).cloned().unwrap_or_default(),
            ApproverKind::Department => self.departments.get(value).cloned().unwrap_or_default(),
            ApproverKind::Manager => self
                .managers
                .get(&Principal::new(value))
                .cloned()
                .into_iter()
                .collect(),
        };
        Ok(found)
    }
}
