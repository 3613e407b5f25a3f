//! Approver inbox

use crate::api::rest::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use workflow_engine::PendingApproval;
use workflow_types::Principal;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub principal: Principal,
}

/// Open steps waiting on a decision from `principal`, most urgent first
pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Json<Vec<PendingApproval>> {
    Json(state.orchestrator.pending_for(&query.principal).await)
}
