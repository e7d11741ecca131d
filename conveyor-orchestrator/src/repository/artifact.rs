//! Artifact Repository
//!
//! Handles all database operations related to stored artifacts.

use conveyor_core::domain::artifact::ArtifactRef;
use conveyor_core::domain::execution::ExecutionId;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Insert an artifact; fails with a unique violation if the identity already exists
pub async fn insert(pool: &SqlitePool, artifact: &ArtifactRef, content: &[u8]) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO artifacts (pipeline_id, name, execution_id, digest, content, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(artifact.pipeline_id)
    .bind(&artifact.name)
    .bind(artifact.execution_id)
    .bind(&artifact.digest)
    .bind(content)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Stored payload for an exact artifact identity
pub async fn find(
    pool: &SqlitePool,
    pipeline_id: Uuid,
    name: &str,
    execution_id: ExecutionId,
) -> Result<Option<StoredArtifact>, sqlx::Error> {
    sqlx::query_as::<_, StoredArtifact>(
        r#"
        SELECT digest, content
        FROM artifacts
        WHERE pipeline_id = ? AND name = ? AND execution_id = ?
        "#,
    )
    .bind(pipeline_id)
    .bind(name)
    .bind(execution_id)
    .fetch_optional(pool)
    .await
}

/// Highest execution that stored an artifact under this name
pub async fn latest_execution(
    pool: &SqlitePool,
    pipeline_id: Uuid,
    name: &str,
) -> Result<Option<ExecutionId>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<i64>>(
        "SELECT MAX(execution_id) FROM artifacts WHERE pipeline_id = ? AND name = ?",
    )
    .bind(pipeline_id)
    .bind(name)
    .fetch_one(pool)
    .await
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
pub struct StoredArtifact {
    pub digest: String,
    pub content: Vec<u8>,
}
