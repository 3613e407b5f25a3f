//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Definitions
        .route(
            "/definitions",
            get(handlers::list_definitions).post(handlers::publish_definition),
        )
        .route("/definitions/:id", get(handlers::get_definition))
        // Instances
        .route("/instances", post(handlers::submit_request))
        .route("/instances/:id", get(handlers::get_instance))
        .route("/instances/:id/audit", get(handlers::get_audit_trail))
        .route("/instances/:id/decisions", post(handlers::record_decision))
        .route("/instances/:id/cancel", post(handlers::cancel_instance))
        .route(
            "/instances/:id/steps/:step/timeout",
            post(handlers::deliver_timeout),
        )
        // Approver inbox
        .route("/approvals/pending", get(handlers::list_pending));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
