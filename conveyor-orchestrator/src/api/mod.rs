//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod approval;
pub mod deployment;
pub mod error;
pub mod execution;
pub mod health;
pub mod pipeline;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

/// Shared handler state
pub type AppState = Arc<Engine>;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipeline/create", post(pipeline::create_pipeline))
        .route("/pipeline/list", get(pipeline::list_pipelines))
        .route(
            "/pipeline/{id}",
            get(pipeline::get_pipeline)
                .put(pipeline::update_pipeline)
                .delete(pipeline::delete_pipeline),
        )
        .route("/pipeline/{id}/trigger", post(execution::trigger_execution))
        // Execution endpoints
        .route("/execution/{id}", get(execution::get_execution))
        .route("/execution/{id}/stop", post(execution::stop_execution))
        .route(
            "/execution/pipeline/{pipeline_id}",
            get(execution::list_executions_by_pipeline),
        )
        // Approval endpoints
        .route("/approval/pending", get(approval::list_pending_approvals))
        .route("/approval/{id}", get(approval::get_approval))
        .route("/approval/{id}/resolve", post(approval::resolve_approval))
        // Deployment endpoints
        .route("/deployment/{target}", get(deployment::get_deployment))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
