//! Pipeline Service
//!
//! Business logic for pipeline management.

use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::dto::pipeline::{CreatePipeline, PipelineSummary};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::engine::Engine;
use crate::repository::pipeline_repository;

/// Service error type
#[derive(Debug)]
pub enum PipelineError {
    NotFound(Uuid),
    ValidationError(String),
    /// The pipeline has an execution in flight
    Running(Uuid),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Create a new pipeline
pub async fn create_pipeline(pool: &SqlitePool, req: CreatePipeline) -> Result<Pipeline> {
    validate_pipeline_request(&req)?;

    let pipeline = pipeline_repository::create(pool, req.definition).await?;

    tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);

    Ok(pipeline)
}

/// Get a pipeline by ID
pub async fn get_pipeline(pool: &SqlitePool, id: Uuid) -> Result<Pipeline> {
    let pipeline = pipeline_repository::find_by_id(pool, id)
        .await?
        .ok_or(PipelineError::NotFound(id))?;

    Ok(pipeline)
}

/// List all pipelines
pub async fn list_pipelines(pool: &SqlitePool) -> Result<Vec<PipelineSummary>> {
    let pipelines = pipeline_repository::list_all(pool).await?;
    Ok(pipelines.into_iter().map(PipelineSummary::from).collect())
}

/// Replace a pipeline's definition; refused while an execution is running
pub async fn update_pipeline(engine: &Engine, id: Uuid, req: CreatePipeline) -> Result<Pipeline> {
    validate_pipeline_request(&req)?;

    let _existing = get_pipeline(engine.pool(), id).await?;

    if engine.scheduler().is_running(id).await {
        return Err(PipelineError::Running(id));
    }

    let updated = pipeline_repository::update(engine.pool(), id, req.definition).await?;

    if !updated {
        return Err(PipelineError::NotFound(id));
    }

    tracing::info!("Pipeline updated: {}", id);

    get_pipeline(engine.pool(), id).await
}

/// Delete a pipeline; refused while an execution is running
pub async fn delete_pipeline(engine: &Engine, id: Uuid) -> Result<()> {
    if engine.scheduler().is_running(id).await {
        return Err(PipelineError::Running(id));
    }

    let deleted = pipeline_repository::delete(engine.pool(), id).await?;

    if !deleted {
        return Err(PipelineError::NotFound(id));
    }

    tracing::info!("Pipeline deleted: {}", id);

    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_pipeline_request(req: &CreatePipeline) -> Result<()> {
    if req.definition.name.len() > 255 {
        return Err(PipelineError::ValidationError(
            "Pipeline name is too long (max 255 characters)".to_string(),
        ));
    }

    req.definition
        .validate()
        .map_err(|e| PipelineError::ValidationError(e.to_string()))
}
