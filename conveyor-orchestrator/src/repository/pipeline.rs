//! Pipeline Repository
//!
//! Handles all database operations related to pipelines.

use conveyor_core::domain::pipeline::{Pipeline, PipelineDefinition, Stage};
use sqlx::SqlitePool;
use sqlx::types::Json;
use uuid::Uuid;

/// Create a new pipeline in the database
pub async fn create(pool: &SqlitePool, definition: PipelineDefinition) -> Result<Pipeline, sqlx::Error> {
    let now = chrono::Utc::now();

    let pipeline = Pipeline {
        id: Uuid::new_v4(),
        name: definition.name,
        description: definition.description,
        stages: definition.stages,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO pipelines (id, name, description, stages, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(pipeline.id)
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(Json(&pipeline.stages))
    .bind(pipeline.created_at)
    .bind(pipeline.updated_at)
    .execute(pool)
    .await?;

    Ok(pipeline)
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, name, description, stages, created_at, updated_at
        FROM pipelines
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all pipelines
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, name, description, stages, created_at, updated_at
        FROM pipelines
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Replace the definition of an existing pipeline
pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    definition: PipelineDefinition,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipelines
        SET name = ?, description = ?, stages = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&definition.name)
    .bind(&definition.description)
    .bind(Json(&definition.stages))
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a pipeline by ID
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipelines WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    stages: Json<Vec<Stage>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            name: row.name,
            description: row.description,
            stages: row.stages.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
