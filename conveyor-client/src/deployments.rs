//! Deployment-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::deployment::DeploymentRecord;

impl OrchestratorClient {
    /// Current traffic state of a blue/green deploy target
    pub async fn get_deployment(&self, target: &str) -> Result<DeploymentRecord> {
        let response = self
            .client
            .get(self.url(&format!("/deployment/{}", target)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
