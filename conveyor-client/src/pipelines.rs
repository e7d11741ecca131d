//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::pipeline::{Pipeline, PipelineDefinition};
use conveyor_core::dto::pipeline::{CreatePipeline, PipelineSummary};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Create a new pipeline
    ///
    /// The orchestrator validates the definition and answers 400 when it is
    /// structurally invalid.
    ///
    /// # Example
    /// ```no_run
    /// # use conveyor_client::OrchestratorClient;
    /// # use conveyor_core::domain::pipeline::{Action, ActionKind, PipelineDefinition, Stage};
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let definition = PipelineDefinition::builder("shop")
    ///     .stage(Stage::new("Source").action(Action::new("Checkout", ActionKind::Source).output("Src")))
    ///     .build()?;
    /// let pipeline = client.create_pipeline(definition).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_pipeline(&self, definition: PipelineDefinition) -> Result<Pipeline> {
        let response = self
            .client
            .post(self.url("/pipeline/create"))
            .json(&CreatePipeline { definition })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List all pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let response = self.client.get(self.url("/pipeline/list")).send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline by ID
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let response = self
            .client
            .get(self.url(&format!("/pipeline/{}", pipeline_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Replace a pipeline's definition
    ///
    /// Fails with 409 while the pipeline has an execution running.
    pub async fn update_pipeline(
        &self,
        pipeline_id: Uuid,
        definition: PipelineDefinition,
    ) -> Result<Pipeline> {
        let response = self
            .client
            .put(self.url(&format!("/pipeline/{}", pipeline_id)))
            .json(&CreatePipeline { definition })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Delete a pipeline
    pub async fn delete_pipeline(&self, pipeline_id: Uuid) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/pipeline/{}", pipeline_id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
