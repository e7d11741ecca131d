//! Execution DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::{Execution, ExecutionId, ExecutionStatus, StageState};

/// Request to start an execution for a new source revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerExecution {
    pub revision: String,
}

/// Execution status query response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatusView {
    pub id: ExecutionId,
    pub pipeline_id: Uuid,
    pub status: ExecutionStatus,
    pub stages: Vec<StageState>,
    pub failing_stage: Option<String>,
    pub failing_action: Option<String>,
    pub error: Option<String>,
}

impl From<Execution> for ExecutionStatusView {
    fn from(execution: Execution) -> Self {
        Self {
            id: execution.id,
            pipeline_id: execution.pipeline_id,
            status: execution.status,
            stages: execution.stages,
            failing_stage: execution.failing_stage,
            failing_action: execution.failing_action,
            error: execution.error,
        }
    }
}

/// Execution summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: ExecutionId,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub revision: String,
    pub status: ExecutionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Execution> for ExecutionSummary {
    fn from(execution: Execution) -> Self {
        Self {
            id: execution.id,
            pipeline_id: execution.pipeline_id,
            pipeline_name: execution.pipeline_name,
            revision: execution.revision,
            status: execution.status,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }
}
