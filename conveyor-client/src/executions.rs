//! Execution-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::execution::ExecutionId;
use conveyor_core::dto::execution::{ExecutionStatusView, ExecutionSummary, TriggerExecution};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Executions
    // =============================================================================

    /// Start an execution of a pipeline for a source revision
    ///
    /// Fails with 409 when the pipeline is busy and the orchestrator
    /// rejects concurrent executions.
    pub async fn trigger_execution(
        &self,
        pipeline_id: Uuid,
        revision: impl Into<String>,
    ) -> Result<ExecutionSummary> {
        let response = self
            .client
            .post(self.url(&format!("/pipeline/{}/trigger", pipeline_id)))
            .json(&TriggerExecution {
                revision: revision.into(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get the status of an execution
    pub async fn get_execution(&self, execution_id: ExecutionId) -> Result<ExecutionStatusView> {
        let response = self
            .client
            .get(self.url(&format!("/execution/{}", execution_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List executions of a pipeline, newest first
    pub async fn list_executions(&self, pipeline_id: Uuid) -> Result<Vec<ExecutionSummary>> {
        let response = self
            .client
            .get(self.url(&format!("/execution/pipeline/{}", pipeline_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Ask a running execution to stop
    pub async fn stop_execution(&self, execution_id: ExecutionId) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/execution/{}/stop", execution_id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
