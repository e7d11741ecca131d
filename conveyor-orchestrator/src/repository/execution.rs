//! Execution Repository
//!
//! Handles all database operations related to pipeline executions.

use conveyor_core::domain::artifact::ArtifactSet;
use conveyor_core::domain::execution::{
    Execution, ExecutionId, ExecutionStatus, StageState, Trigger,
};
use conveyor_core::domain::pipeline::Pipeline;
use sqlx::SqlitePool;
use sqlx::types::Json;
use uuid::Uuid;

/// Insert a new Running execution of `pipeline` and return it with its assigned ID
pub async fn create(
    pool: &SqlitePool,
    pipeline: &Pipeline,
    trigger: &Trigger,
) -> Result<Execution, sqlx::Error> {
    let mut execution = Execution::start(0, pipeline, trigger);

    let result = sqlx::query(
        r#"
        INSERT INTO executions (pipeline_id, pipeline_name, revision, status, stages, artifacts, started_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(execution.pipeline_id)
    .bind(&execution.pipeline_name)
    .bind(&execution.revision)
    .bind(status_to_string(execution.status))
    .bind(Json(&execution.stages))
    .bind(Json(&execution.artifacts))
    .bind(execution.started_at)
    .execute(pool)
    .await?;

    execution.id = result.last_insert_rowid();
    Ok(execution)
}

/// Persist the mutable state of an execution
pub async fn save(pool: &SqlitePool, execution: &Execution) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET status = ?, stages = ?, artifacts = ?, failing_stage = ?, failing_action = ?,
            error = ?, completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status_to_string(execution.status))
    .bind(Json(&execution.stages))
    .bind(Json(&execution.artifacts))
    .bind(&execution.failing_stage)
    .bind(&execution.failing_action)
    .bind(&execution.error)
    .bind(execution.completed_at)
    .bind(execution.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Find an execution by ID
pub async fn find_by_id(pool: &SqlitePool, id: ExecutionId) -> Result<Option<Execution>, sqlx::Error> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, pipeline_id, pipeline_name, revision, status, stages, artifacts,
               failing_stage, failing_action, error, started_at, completed_at
        FROM executions
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List executions of a pipeline, newest first
pub async fn find_by_pipeline(
    pool: &SqlitePool,
    pipeline_id: Uuid,
) -> Result<Vec<Execution>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, pipeline_id, pipeline_name, revision, status, stages, artifacts,
               failing_stage, failing_action, error, started_at, completed_at
        FROM executions
        WHERE pipeline_id = ?
        ORDER BY id DESC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List executions still marked Running, oldest first
pub async fn find_running(pool: &SqlitePool) -> Result<Vec<Execution>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, pipeline_id, pipeline_name, revision, status, stages, artifacts,
               failing_stage, failing_action, error, started_at, completed_at
        FROM executions
        WHERE status = ?
        ORDER BY id ASC
        "#,
    )
    .bind(status_to_string(ExecutionStatus::Running))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: i64,
    pipeline_id: Uuid,
    pipeline_name: String,
    revision: String,
    status: String,
    stages: Json<Vec<StageState>>,
    artifacts: Json<ArtifactSet>,
    failing_stage: Option<String>,
    failing_action: Option<String>,
    error: Option<String>,
    started_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ExecutionRow> for Execution {
    fn from(row: ExecutionRow) -> Self {
        Execution {
            id: row.id,
            pipeline_id: row.pipeline_id,
            pipeline_name: row.pipeline_name,
            revision: row.revision,
            status: string_to_status(&row.status),
            stages: row.stages.0,
            artifacts: row.artifacts.0,
            failing_stage: row.failing_stage,
            failing_action: row.failing_action,
            error: row.error,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "Running",
        ExecutionStatus::Succeeded => "Succeeded",
        ExecutionStatus::Failed => "Failed",
        ExecutionStatus::Stopped => "Stopped",
    }
}

fn string_to_status(s: &str) -> ExecutionStatus {
    match s {
        "Succeeded" => ExecutionStatus::Succeeded,
        "Failed" => ExecutionStatus::Failed,
        "Stopped" => ExecutionStatus::Stopped,
        _ => ExecutionStatus::Running,
    }
}
