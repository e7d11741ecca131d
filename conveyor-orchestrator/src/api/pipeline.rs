//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::dto::pipeline::{CreatePipeline, PipelineSummary};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::pipeline_service::{self, PipelineError};

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(id) => ApiError::NotFound(format!("Pipeline {} not found", id)),
            PipelineError::ValidationError(msg) => ApiError::BadRequest(msg),
            PipelineError::Running(id) => {
                ApiError::Conflict(format!("Pipeline {} has an execution running", id))
            }
            PipelineError::DatabaseError(err) => ApiError::Database(err),
        }
    }
}

/// POST /pipeline/create
/// Create a new pipeline
pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    tracing::info!("Creating pipeline: {}", req.definition.name);

    let pipeline = pipeline_service::create_pipeline(state.pool(), req).await?;

    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// GET /pipeline/list
/// List all pipelines
pub async fn list_pipelines(State(state): State<AppState>) -> ApiResult<Json<Vec<PipelineSummary>>> {
    tracing::debug!("Listing all pipelines");

    let pipelines = pipeline_service::list_pipelines(state.pool()).await?;

    Ok(Json(pipelines))
}

/// GET /pipeline/{id}
/// Get pipeline by ID
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);

    let pipeline = pipeline_service::get_pipeline(state.pool(), id).await?;

    Ok(Json(pipeline))
}

/// PUT /pipeline/{id}
/// Replace a pipeline definition
pub async fn update_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Updating pipeline: {}", id);

    let pipeline = pipeline_service::update_pipeline(&state, id, req).await?;

    Ok(Json(pipeline))
}

/// DELETE /pipeline/{id}
/// Delete a pipeline
pub async fn delete_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline: {}", id);

    pipeline_service::delete_pipeline(&state, id).await?;

    Ok(StatusCode::NO_CONTENT)
}
