//! Timer collaborator: step deadlines
//!
//! Registration and cancellation never block and never fail. A fired
//! deadline comes back as a [`TimeoutCallback`]; delivery is
//! at-least-once, so the engine treats every callback as idempotent.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use workflow_types::{NodeId, RequestInstanceId, TimerHandle};

/// A deadline that has passed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutCallback {
    pub instance_id: RequestInstanceId,
    pub step_id: NodeId,
    /// The deadline this callback was registered for
    pub deadline: DateTime<Utc>,
}

pub trait Timer: Send + Sync {
    fn register_deadline(
        &self,
        instance_id: &RequestInstanceId,
        step_id: &NodeId,
        at: DateTime<Utc>,
    ) -> TimerHandle;

    /// Cancelling an unknown or already fired handle is a no-op
    fn cancel(&self, handle: &TimerHandle);
}

// ── Tokio Timer ──────────────────────────────────────────────────────

/// Sleeps on the tokio runtime and sends callbacks over a channel
pub struct TokioTimer {
    sender: mpsc::Sender<TimeoutCallback>,
    pending: Arc<Mutex<HashMap<TimerHandle, JoinHandle<()>>>>,
}

impl TokioTimer {
    pub fn new(sender: mpsc::Sender<TimeoutCallback>) -> Self {
        Self {
            sender,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A timer together with the receiving end of its callbacks
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TimeoutCallback>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }

    /// Deadlines registered and not yet fired or cancelled
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Timer for TokioTimer {
    fn register_deadline(
        &self,
        instance_id: &RequestInstanceId,
        step_id: &NodeId,
        at: DateTime<Utc>,
    ) -> TimerHandle {
        let handle = TimerHandle::generate();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // The overdue sweep still picks the step up
            tracing::warn!(
                instance_id = %instance_id,
                step_id = %step_id,
                "No tokio runtime, deadline left to the overdue sweep"
            );
            return handle;
        };

        let callback = TimeoutCallback {
            instance_id: instance_id.clone(),
            step_id: step_id.clone(),
            deadline: at,
        };
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let sender = self.sender.clone();
        let pending = Arc::clone(&self.pending);
        let key = handle.clone();

        let mut guard = self.pending.lock();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            pending.lock().remove(&key);
            if sender.send(callback).await.is_err() {
                tracing::debug!(handle = %key, "Timeout receiver dropped");
            }
        });
        guard.insert(handle.clone(), task);
        handle
    }

    fn cancel(&self, handle: &TimerHandle) {
        if let Some(task) = self.pending.lock().remove(handle) {
            task.abort();
        }
    }
}

// ── Recording Timer ──────────────────────────────────────────────────

/// Remembers registrations without ever firing; callers deliver
/// timeouts themselves
#[derive(Debug, Default)]
pub struct RecordingTimer {
    registered: Mutex<Vec<(TimerHandle, TimeoutCallback)>>,
    cancelled: Mutex<HashSet<TimerHandle>>,
}

impl RecordingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registration ever made
    pub fn registrations(&self) -> Vec<TimeoutCallback> {
        self.registered
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect()
    }

    /// Registrations not cancelled
    pub fn active(&self) -> Vec<TimeoutCallback> {
        let cancelled = self.cancelled.lock();
        self.registered
            .lock()
            .iter()
            .filter(|(handle, _)| !cancelled.contains(handle))
            .map(|(_, cb)| cb.clone())
            .collect()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.lock().len()
    }
}

impl Timer for RecordingTimer {
    fn register_deadline(
        &self,
        instance_id: &RequestInstanceId,
        step_id: &NodeId,
        at: DateTime<Utc>,
    ) -> TimerHandle {
        let handle = TimerHandle::generate();
        self.registered.lock().push((
            handle.clone(),
            TimeoutCallback {
                instance_id: instance_id.clone(),
                step_id: step_id.clone(),
                deadline: at,
            },
        ));
        handle
    }

    fn cancel(&self, handle: &TimerHandle) {
        self.cancelled.lock().insert(handle.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_tokio_timer_fires() {
        let (timer, mut receiver) = TokioTimer::channel(8);
        let instance = RequestInstanceId::new("r1");
        let step = NodeId::new("review");
        let at = Utc::now() + Duration::milliseconds(20);

        timer.register_deadline(&instance, &step, at);
        let callback = receiver.recv().await.unwrap();
        assert_eq!(callback.instance_id, instance);
        assert_eq!(callback.step_id, step);
        assert_eq!(callback.deadline, at);
        assert_eq!(timer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_tokio_timer_cancel() {
        let (timer, mut receiver) = TokioTimer::channel(8);
        let handle = timer.register_deadline(
            &RequestInstanceId::new("r1"),
            &NodeId::new("review"),
            Utc::now() + Duration::milliseconds(50),
        );
        assert_eq!(timer.pending_count(), 1);
        timer.cancel(&handle);
        timer.cancel(&handle);
        assert_eq!(timer.pending_count(), 0);

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(150), receiver.recv()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_recording_timer() {
        let timer = RecordingTimer::new();
        let h1 = timer.register_deadline(
            &RequestInstanceId::new("r1"),
            &NodeId::new("a"),
            Utc::now(),
        );
        timer.register_deadline(&RequestInstanceId::new("r1"), &NodeId::new("b"), Utc::now());
        timer.cancel(&h1);

        assert_eq!(timer.registrations().len(), 2);
        assert_eq!(timer.active().len(), 1);
        assert_eq!(timer.active()[0].step_id, NodeId::new("b"));
        assert_eq!(timer.cancelled_count(), 1);
    }
}
