//! Request instance handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use workflow_engine::{DecisionInput, Submission};
use workflow_types::{
    AuditEntry, InstanceStatus, NodeId, Principal, RequestInstance, RequestInstanceId,
};

/// Where an instance stands after an operation
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceStatusResponse {
    pub instance_id: RequestInstanceId,
    pub status: InstanceStatus,
}

/// Submit a request against the latest version of a definition
pub async fn submit_request(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> ApiResult<(StatusCode, Json<InstanceStatusResponse>)> {
    let instance_id = state.orchestrator.submit(submission).await?;
    let status = state.orchestrator.get_instance(&instance_id).await?.status;

    tracing::info!(instance_id = %instance_id, status = %status, "Request submitted via API");

    Ok((
        StatusCode::CREATED,
        Json(InstanceStatusResponse {
            instance_id,
            status,
        }),
    ))
}

/// Get a snapshot of an instance
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestInstance>> {
    let instance = state
        .orchestrator
        .get_instance(&RequestInstanceId::new(id))
        .await?;
    Ok(Json(instance))
}

/// Get the audit trail of an instance
pub async fn get_audit_trail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let entries = state
        .orchestrator
        .audit_trail(&RequestInstanceId::new(id))
        .await?;
    Ok(Json(entries))
}

/// Decision request body
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub step_id: NodeId,
    pub principal: Principal,
    #[serde(flatten)]
    pub decision: DecisionInput,
}

/// Record a decision on an approval step
pub async fn record_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Json<InstanceStatusResponse>> {
    let instance_id = RequestInstanceId::new(id);
    let status = state
        .orchestrator
        .record_decision(
            &instance_id,
            &request.step_id,
            request.principal,
            request.decision,
        )
        .await?;

    Ok(Json(InstanceStatusResponse {
        instance_id,
        status,
    }))
}

/// Cancel request body
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// Cancel an open instance
pub async fn cancel_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<Json<InstanceStatusResponse>> {
    let instance_id = RequestInstanceId::new(id);
    let reason = body.and_then(|Json(request)| request.reason);
    let status = state.orchestrator.cancel(&instance_id, reason).await?;

    Ok(Json(InstanceStatusResponse {
        instance_id,
        status,
    }))
}

/// Deliver a deadline expiry from an external timer
pub async fn deliver_timeout(
    State(state): State<AppState>,
    Path((id, step)): Path<(String, String)>,
) -> ApiResult<Json<InstanceStatusResponse>> {
    let instance_id = RequestInstanceId::new(id);
    state
        .orchestrator
        .handle_timeout(&instance_id, &NodeId::new(step))
        .await?;
    let status = state.orchestrator.get_instance(&instance_id).await?.status;

    Ok(Json(InstanceStatusResponse {
        instance_id,
        status,
    }))
}
