//! Execution state-change events

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::{Execution, ExecutionId, ExecutionStatus};

/// Terminal state change of an execution, published by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: ExecutionId,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    pub failing_stage: Option<String>,
    pub failing_action: Option<String>,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&Execution> for ExecutionEvent {
    fn from(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id,
            pipeline_id: execution.pipeline_id,
            pipeline_name: execution.pipeline_name.clone(),
            status: execution.status,
            failing_stage: execution.failing_stage.clone(),
            failing_action: execution.failing_action.clone(),
            error: execution.error.clone(),
            timestamp: execution.completed_at.unwrap_or_else(chrono::Utc::now),
        }
    }
}
