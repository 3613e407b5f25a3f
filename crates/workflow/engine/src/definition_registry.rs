//! Definition registry: stores and retrieves published workflow definitions
//!
//! Definitions are immutable once published. Publishing an id again
//! stores the next version alongside the earlier ones, so instances
//! pinned to an old version keep resolving it.

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::sync::Arc;
use workflow_types::{WorkflowDefinition, WorkflowDefinitionId, WorkflowGraph};

/// Registry of validated, indexed definition versions
#[derive(Clone, Debug, Default)]
pub struct DefinitionRegistry {
    /// Every published version per id; version `n` lives at index `n - 1`
    versions: HashMap<WorkflowDefinitionId, Vec<Arc<WorkflowGraph>>>,
    /// Name → id of the definition most recently published under it
    by_name: HashMap<String, WorkflowDefinitionId>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a definition, assigning the next version.
    ///
    /// Whatever version the caller put on the definition is overwritten.
    pub fn publish(&mut self, mut definition: WorkflowDefinition) -> EngineResult<Arc<WorkflowGraph>> {
        let id = definition.id.clone();
        let versions = self.versions.get(&id).map_or(0, Vec::len);
        definition.version = versions as u32 + 1;

        let graph = Arc::new(WorkflowGraph::build(definition).map_err(|errors| {
            tracing::warn!(definition_id = %id, errors = errors.len(), "Definition rejected");
            EngineError::InvalidDefinition(errors)
        })?);

        self.by_name.insert(graph.definition().name.clone(), id.clone());
        self.versions.entry(id.clone()).or_default().push(Arc::clone(&graph));

        tracing::info!(
            definition_id = %id,
            version = graph.version(),
            nodes = graph.definition().node_count(),
            "Workflow definition published"
        );
        Ok(graph)
    }

    /// Latest version of a definition
    pub fn get(&self, id: &WorkflowDefinitionId) -> EngineResult<Arc<WorkflowGraph>> {
        self.versions
            .get(id)
            .and_then(|v| v.last())
            .cloned()
            .ok_or_else(|| EngineError::DefinitionNotFound(id.clone()))
    }

    /// A specific version of a definition
    pub fn get_version(&self, id: &WorkflowDefinitionId, version: u32) -> EngineResult<Arc<WorkflowGraph>> {
        let versions = self
            .versions
            .get(id)
            .ok_or_else(|| EngineError::DefinitionNotFound(id.clone()))?;
        (version as usize)
            .checked_sub(1)
            .and_then(|i| versions.get(i))
            .cloned()
            .ok_or_else(|| EngineError::DefinitionVersionNotFound {
                id: id.clone(),
                version,
            })
    }

    /// Latest version of the definition last published under `name`
    pub fn get_latest_by_name(&self, name: &str) -> Option<Arc<WorkflowGraph>> {
        self.by_name.get(name).and_then(|id| self.get(id).ok())
    }

    /// Latest version of every definition
    pub fn list(&self) -> Vec<Arc<WorkflowGraph>> {
        self.versions.values().filter_map(|v| v.last().cloned()).collect()
    }

    /// Number of distinct definition ids
    pub fn count(&self) -> usize {
        self.versions.len()
    }

    pub fn contains(&self, id: &WorkflowDefinitionId) -> bool {
        self.versions.contains_key(id)
    }
}
