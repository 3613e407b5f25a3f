//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::Scheduler;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use workflow_engine::{TimeoutCallback, TokioTimer, TracingNotifier, WorkflowOrchestrator};

/// approvald server
pub struct Server {
    config: DaemonConfig,
    orchestrator: Arc<WorkflowOrchestrator>,
    scheduler: Arc<Scheduler>,
    timeouts: mpsc::Receiver<TimeoutCallback>,
}

impl Server {
    /// Wire the engine to its built-in collaborators
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        if config.scheduler.timer_channel_capacity == 0 {
            return Err(DaemonError::Config(
                "scheduler.timer_channel_capacity must be positive".to_string(),
            ));
        }

        let directory = Arc::new(config.directory.build());
        let (timer, timeouts) = TokioTimer::channel(config.scheduler.timer_channel_capacity);

        let orchestrator = Arc::new(
            WorkflowOrchestrator::new(directory, Arc::new(TracingNotifier), Arc::new(timer))
                .with_retry_policy(config.scheduler.retry_policy()),
        );
        let scheduler = Scheduler::new(config.scheduler.clone(), orchestrator.clone());

        Ok(Self {
            config,
            orchestrator,
            scheduler,
            timeouts,
        })
    }

    pub fn orchestrator(&self) -> Arc<WorkflowOrchestrator> {
        self.orchestrator.clone()
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let Self {
            config,
            orchestrator,
            scheduler,
            timeouts,
        } = self;
        let addr = config.server.listen_addr;

        let app = create_router(AppState::new(orchestrator), config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("approvald listening on {}", addr);
        tracing::info!(
            roles = config.directory.roles.len(),
            departments = config.directory.departments.len(),
            managers = config.directory.managers.len(),
            "Directory loaded"
        );

        // Start scheduler in background
        let scheduler_task = tokio::spawn(scheduler.clone().start(timeouts));

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("approvald shutting down");

        scheduler.stop().await;
        scheduler_task.abort();

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
