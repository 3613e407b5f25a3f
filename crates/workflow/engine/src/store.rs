//! Instance snapshot persistence

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use workflow_types::{RequestInstance, RequestInstanceId};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persists full instance snapshots: state, step states and audit log
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Saves run outside the instance lock and may arrive out of order;
    /// a snapshot older than the stored `revision` must be ignored.
    async fn save(&self, instance: &RequestInstance) -> StoreResult<()>;

    async fn load(&self, id: &RequestInstanceId) -> StoreResult<Option<RequestInstance>>;

    async fn load_all(&self) -> StoreResult<Vec<RequestInstance>>;
}

/// Keeps snapshots as JSON documents in memory
#[derive(Clone, Default)]
pub struct InMemoryInstanceStore {
    snapshots: Arc<RwLock<HashMap<RequestInstanceId, Snapshot>>>,
}

struct Snapshot {
    revision: u64,
    json: String,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw JSON snapshot of an instance
    pub async fn raw(&self, id: &RequestInstanceId) -> Option<String> {
        self.snapshots.read().await.get(id).map(|s| s.json.clone())
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn save(&self, instance: &RequestInstance) -> StoreResult<()> {
        let json = serde_json::to_string(instance)?;
        let mut snapshots = self.snapshots.write().await;
        if let Some(stored) = snapshots.get(&instance.id) {
            if stored.revision > instance.revision {
                tracing::debug!(
                    instance_id = %instance.id,
                    stored = stored.revision,
                    incoming = instance.revision,
                    "Ignoring stale snapshot"
                );
                return Ok(());
            }
        }
        snapshots.insert(
            instance.id.clone(),
            Snapshot {
                revision: instance.revision,
                json,
            },
        );
        Ok(())
    }

    async fn load(&self, id: &RequestInstanceId) -> StoreResult<Option<RequestInstance>> {
        let snapshots = self.snapshots.read().await;
        match snapshots.get(id) {
            Some(snapshot) => Ok(Some(serde_json::from_str(&snapshot.json)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> StoreResult<Vec<RequestInstance>> {
        let snapshots = self.snapshots.read().await;
        snapshots
            .values()
            .map(|s| serde_json::from_str(&s.json).map_err(StoreError::from))
            .collect()
    }
}
