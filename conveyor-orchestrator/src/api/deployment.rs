//! Deployment API Handlers
//!
//! HTTP endpoints for blue/green deploy target status.

use axum::{
    Json,
    extract::{Path, State},
};
use conveyor_core::domain::deployment::DeploymentRecord;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::engine::blue_green::DeployError;
use crate::service::deployment_service;

/// GET /deployment/{target}
/// Current traffic state of a deploy target
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> ApiResult<Json<DeploymentRecord>> {
    tracing::debug!("Getting deployment: {}", target);

    let record = deployment_service::get_deployment(&state, &target)
        .await
        .map_err(|e| match e {
            DeployError::Database(err) => ApiError::Database(err),
            other => ApiError::Internal(other.to_string()),
        })?
        .ok_or_else(|| ApiError::NotFound(format!("Deploy target {} has no deployments", target)))?;

    Ok(Json(record))
}
