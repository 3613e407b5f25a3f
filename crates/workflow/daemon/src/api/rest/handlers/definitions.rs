//! Definition publishing handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use workflow_types::{WorkflowDefinition, WorkflowDefinitionId, WorkflowGraph};

/// What a published definition looks like in listings
#[derive(Debug, Serialize, Deserialize)]
pub struct DefinitionSummary {
    pub id: WorkflowDefinitionId,
    pub version: u32,
    pub name: String,
    pub nodes: usize,
    pub edges: usize,
}

impl From<&WorkflowGraph> for DefinitionSummary {
    fn from(graph: &WorkflowGraph) -> Self {
        let definition = graph.definition();
        Self {
            id: definition.id.clone(),
            version: definition.version,
            name: definition.name.clone(),
            nodes: definition.node_count(),
            edges: definition.edge_count(),
        }
    }
}

/// Validate and publish a definition as its next version
pub async fn publish_definition(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<(StatusCode, Json<DefinitionSummary>)> {
    let graph = state.orchestrator.publish_definition(definition).await?;
    Ok((StatusCode::CREATED, Json(DefinitionSummary::from(&*graph))))
}

/// List the latest version of every definition
pub async fn list_definitions(State(state): State<AppState>) -> Json<Vec<DefinitionSummary>> {
    let graphs = state.orchestrator.list_definitions().await;
    let mut summaries: Vec<_> = graphs.iter().map(|g| DefinitionSummary::from(&**g)).collect();
    summaries.sort_by(|a, b| a.id.0.cmp(&b.id.0));
    Json(summaries)
}

#[derive(Debug, Deserialize)]
pub struct DefinitionQuery {
    pub version: Option<u32>,
}

/// Get a definition; the latest version unless `?version=` names one
pub async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DefinitionQuery>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let graph = state
        .orchestrator
        .get_definition(&WorkflowDefinitionId::new(id), query.version)
        .await?;
    Ok(Json(graph.definition().clone()))
}
