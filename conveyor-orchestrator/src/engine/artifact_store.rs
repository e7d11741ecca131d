//! Artifact Store
//!
//! Write-once, content-addressed storage for the outputs of actions. An
//! artifact is identified by `(pipeline_id, name, execution_id)`; a reference
//! stops resolving once a newer execution of the same pipeline stores an
//! artifact under the same name.

use conveyor_core::domain::artifact::ArtifactRef;
use conveyor_core::domain::execution::ExecutionId;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::artifact_repository;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact {0} not found")]
    NotFound(String),

    #[error("artifact {0} already exists")]
    Conflict(String),

    #[error("artifact store database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct ArtifactStore {
    pool: SqlitePool,
}

impl ArtifactStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store `content` under `(pipeline_id, name, execution_id)`
    pub async fn put(
        &self,
        pipeline_id: Uuid,
        execution_id: ExecutionId,
        name: &str,
        content: &[u8],
    ) -> Result<ArtifactRef, StoreError> {
        let artifact = ArtifactRef {
            pipeline_id,
            name: name.to_string(),
            execution_id,
            digest: digest(content),
        };

        match artifact_repository::insert(&self.pool, &artifact, content).await {
            Ok(()) => {}
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(StoreError::Conflict(artifact.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::debug!(artifact = %artifact, size = content.len(), "Stored artifact");
        Ok(artifact)
    }

    /// Reference to what `execution_id` already stored under `name`, if anything
    pub async fn stored(
        &self,
        pipeline_id: Uuid,
        execution_id: ExecutionId,
        name: &str,
    ) -> Result<Option<ArtifactRef>, StoreError> {
        let stored = artifact_repository::find(&self.pool, pipeline_id, name, execution_id).await?;
        Ok(stored.map(|stored| ArtifactRef {
            pipeline_id,
            name: name.to_string(),
            execution_id,
            digest: stored.digest,
        }))
    }

    /// Read the payload behind a reference
    pub async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        let stored = artifact_repository::find(
            &self.pool,
            artifact.pipeline_id,
            &artifact.name,
            artifact.execution_id,
        )
        .await?
        .filter(|stored| stored.digest == artifact.digest)
        .ok_or_else(|| StoreError::NotFound(artifact.to_string()))?;

        let latest =
            artifact_repository::latest_execution(&self.pool, artifact.pipeline_id, &artifact.name)
                .await?;
        if latest.is_some_and(|latest| latest > artifact.execution_id) {
            // Superseded by a newer execution
            return Err(StoreError::NotFound(artifact.to_string()));
        }

        Ok(stored.content)
    }
}

/// SHA-256 of `content`, hex encoded
pub fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
