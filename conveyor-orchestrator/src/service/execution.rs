//! Execution Service
//!
//! Business logic for triggering, inspecting and stopping executions.

use conveyor_core::domain::execution::{Execution, ExecutionId, Trigger};
use conveyor_core::dto::execution::{ExecutionSummary, TriggerExecution};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::engine::Engine;
use crate::engine::scheduler::TriggerError;
use crate::repository::{execution_repository, pipeline_repository};

/// Service error type
#[derive(Debug)]
pub enum ExecutionError {
    NotFound(ExecutionId),
    PipelineNotFound(Uuid),
    ValidationError(String),
    /// The pipeline already has an execution running
    Busy {
        pipeline_id: Uuid,
        execution_id: ExecutionId,
    },
    /// The execution is not running
    NotRunning(ExecutionId),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for ExecutionError {
    fn from(err: sqlx::Error) -> Self {
        ExecutionError::DatabaseError(err)
    }
}

impl From<TriggerError> for ExecutionError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Busy {
                pipeline_id,
                execution_id,
            } => ExecutionError::Busy {
                pipeline_id,
                execution_id,
            },
            TriggerError::Database(e) => ExecutionError::DatabaseError(e),
        }
    }
}

/// Start an execution of a pipeline for a source revision
pub async fn trigger_execution(
    engine: &Engine,
    pipeline_id: Uuid,
    req: TriggerExecution,
) -> Result<Execution, ExecutionError> {
    if req.revision.trim().is_empty() {
        return Err(ExecutionError::ValidationError(
            "Revision cannot be empty".to_string(),
        ));
    }

    let pipeline = pipeline_repository::find_by_id(engine.pool(), pipeline_id)
        .await?
        .ok_or(ExecutionError::PipelineNotFound(pipeline_id))?;

    let execution = engine
        .scheduler()
        .trigger(&pipeline, Trigger::revision(req.revision.trim()))
        .await?;

    Ok(execution)
}

/// Get an execution by ID
pub async fn get_execution(pool: &SqlitePool, id: ExecutionId) -> Result<Execution, ExecutionError> {
    let execution = execution_repository::find_by_id(pool, id)
        .await?
        .ok_or(ExecutionError::NotFound(id))?;

    Ok(execution)
}

/// List executions of a pipeline, newest first
pub async fn list_executions_by_pipeline(
    pool: &SqlitePool,
    pipeline_id: Uuid,
) -> Result<Vec<ExecutionSummary>, ExecutionError> {
    // Verify pipeline exists
    let _pipeline = pipeline_repository::find_by_id(pool, pipeline_id)
        .await?
        .ok_or(ExecutionError::PipelineNotFound(pipeline_id))?;

    let executions = execution_repository::find_by_pipeline(pool, pipeline_id).await?;
    Ok(executions.into_iter().map(ExecutionSummary::from).collect())
}

/// Ask a running execution to stop
pub async fn stop_execution(engine: &Engine, id: ExecutionId) -> Result<(), ExecutionError> {
    let execution = get_execution(engine.pool(), id).await?;

    if execution.status.is_terminal() || !engine.scheduler().stop(id).await {
        return Err(ExecutionError::NotRunning(id));
    }

    tracing::info!("Stop requested for execution #{}", id);

    Ok(())
}
