//! Execution API Handlers
//!
//! HTTP endpoints for triggering, inspecting and stopping executions.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conveyor_core::domain::execution::ExecutionId;
use conveyor_core::dto::execution::{ExecutionStatusView, ExecutionSummary, TriggerExecution};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::execution_service::{self, ExecutionError};

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::NotFound(id) => {
                ApiError::NotFound(format!("Execution {} not found", id))
            }
            ExecutionError::PipelineNotFound(id) => {
                ApiError::NotFound(format!("Pipeline {} not found", id))
            }
            ExecutionError::ValidationError(msg) => ApiError::BadRequest(msg),
            ExecutionError::Busy {
                pipeline_id,
                execution_id,
            } => ApiError::Conflict(format!(
                "Pipeline {} is busy with execution {}",
                pipeline_id, execution_id
            )),
            ExecutionError::NotRunning(id) => {
                ApiError::Conflict(format!("Execution {} is not running", id))
            }
            ExecutionError::DatabaseError(err) => ApiError::Database(err),
        }
    }
}

/// POST /pipeline/{id}/trigger
/// Start an execution for a source revision
pub async fn trigger_execution(
    State(state): State<AppState>,
    Path(pipeline_id): Path<Uuid>,
    Json(req): Json<TriggerExecution>,
) -> ApiResult<(StatusCode, Json<ExecutionSummary>)> {
    tracing::info!("Triggering pipeline {} at revision {}", pipeline_id, req.revision);

    let execution = execution_service::trigger_execution(&state, pipeline_id, req).await?;

    Ok((StatusCode::ACCEPTED, Json(execution.into())))
}

/// GET /execution/{id}
/// Get execution status, including the failing stage and action if any
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<ExecutionId>,
) -> ApiResult<Json<ExecutionStatusView>> {
    tracing::debug!("Getting execution: {}", id);

    let execution = execution_service::get_execution(state.pool(), id).await?;

    Ok(Json(execution.into()))
}

/// GET /execution/pipeline/{pipeline_id}
/// List executions of a pipeline
pub async fn list_executions_by_pipeline(
    State(state): State<AppState>,
    Path(pipeline_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ExecutionSummary>>> {
    tracing::debug!("Listing executions for pipeline: {}", pipeline_id);

    let executions =
        execution_service::list_executions_by_pipeline(state.pool(), pipeline_id).await?;

    Ok(Json(executions))
}

/// POST /execution/{id}/stop
/// Stop a running execution
pub async fn stop_execution(
    State(state): State<AppState>,
    Path(id): Path<ExecutionId>,
) -> ApiResult<StatusCode> {
    tracing::info!("Stopping execution: {}", id);

    execution_service::stop_execution(&state, id).await?;

    Ok(StatusCode::ACCEPTED)
}
