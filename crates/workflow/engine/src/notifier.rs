//! Notifier collaborator: a fire-and-forget sink for domain events

use crate::error::NotifyError;
use async_trait::async_trait;
use parking_lot::Mutex;
use workflow_types::{DomainEvent, DomainEventKind};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError>;
}

/// Writes every event to the tracing log
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        let recipients: Vec<&str> = event.recipients.iter().map(|p| p.as_str()).collect();
        tracing::info!(
            kind = %event.kind,
            instance_id = %event.instance_id,
            node_id = event.node_id.as_ref().map(|n| n.0.as_str()),
            recipients = ?recipients,
            template = event.template.as_deref(),
            "Domain event"
        );
        Ok(())
    }
}

/// Keeps every event in memory; optionally fails each delivery
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DomainEvent>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records events but reports every delivery as failed
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<DomainEventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: DomainEventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event.clone());
        if self.failing {
            return Err(NotifyError::Delivery("recording notifier set to fail".into()));
        }
        Ok(())
    }
}
