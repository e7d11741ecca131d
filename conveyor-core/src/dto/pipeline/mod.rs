//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{Pipeline, PipelineDefinition};

/// Request to create or redefine a pipeline; the body is the definition itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    #[serde(flatten)]
    pub definition: PipelineDefinition,
}

/// Lightweight pipeline summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub stage_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Pipeline> for PipelineSummary {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            id: pipeline.id,
            name: pipeline.name,
            description: pipeline.description,
            stage_count: pipeline.stages.len(),
            created_at: pipeline.created_at,
            updated_at: pipeline.updated_at,
        }
    }
}
