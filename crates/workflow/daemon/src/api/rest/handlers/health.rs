//! Health and status handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub stats: EngineStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineStats {
    pub definitions: usize,
    pub instances: usize,
    pub open_instances: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let orchestrator = &state.orchestrator;
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        stats: EngineStats {
            definitions: orchestrator.definition_count().await,
            instances: orchestrator.instance_count().await,
            open_instances: orchestrator.open_instance_count().await,
        },
    })
}
