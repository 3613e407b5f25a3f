//! Deadline delivery and periodic maintenance
//!
//! Three sources feed the engine:
//! - fired deadlines from the tokio timer
//! - the resolution retry interval, for steps whose approver lookup failed
//! - the overdue sweep, for deadlines whose callback was lost

use crate::config::SchedulerConfig;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use workflow_engine::{TimeoutCallback, WorkflowOrchestrator};

/// Counts from one maintenance pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub resolutions_retried: usize,
    pub overdue_swept: usize,
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    orchestrator: Arc<WorkflowOrchestrator>,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, orchestrator: Arc<WorkflowOrchestrator>) -> Arc<Self> {
        Arc::new(Self {
            config,
            orchestrator,
            running: Arc::new(RwLock::new(false)),
        })
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run until stopped or until the timer side of `timeouts` is gone
    pub async fn start(self: Arc<Self>, mut timeouts: mpsc::Receiver<TimeoutCallback>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            retry_interval_secs = self.config.retry_interval_secs,
            sweep_interval_secs = self.config.sweep_interval_secs,
            "Scheduler started"
        );

        let mut retry = interval(Duration::from_secs(self.config.retry_interval_secs.max(1)));
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                callback = timeouts.recv() => match callback {
                    Some(callback) => self.deliver(callback).await,
                    None => {
                        tracing::debug!("Timer channel closed");
                        break;
                    }
                },
                _ = retry.tick() => {
                    let retried = self.orchestrator.retry_pending_resolutions(Utc::now()).await;
                    if retried > 0 {
                        tracing::debug!(steps = retried, "Retried approver resolution");
                    }
                }
                _ = sweep.tick() => {
                    let swept = self.orchestrator.sweep_overdue(Utc::now()).await;
                    if swept > 0 {
                        tracing::info!(steps = swept, "Overdue sweep handled missed deadlines");
                    }
                }
            }

            if !self.is_running().await {
                break;
            }
        }

        {
            let mut running = self.running.write().await;
            *running = false;
        }
        tracing::info!("Scheduler stopped");
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// One retry and sweep pass, outside the timed loop
    pub async fn tick(&self) -> TickReport {
        let now = Utc::now();
        TickReport {
            resolutions_retried: self.orchestrator.retry_pending_resolutions(now).await,
            overdue_swept: self.orchestrator.sweep_overdue(now).await,
        }
    }

    async fn deliver(&self, callback: TimeoutCallback) {
        let instance_id = callback.instance_id.clone();
        let step_id = callback.step_id.clone();
        if let Err(e) = self.orchestrator.handle_timer_fired(callback).await {
            // The sweep picks the step up again on its next pass
            tracing::warn!(
                instance_id = %instance_id,
                step_id = %step_id,
                error = %e,
                "Deadline callback failed"
            );
        }
    }
}
