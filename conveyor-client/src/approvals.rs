//! Approval-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use conveyor_core::domain::approval::{ApprovalRequest, Decision};
use conveyor_core::dto::approval::ResolveApproval;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Approvals
    // =============================================================================

    /// List approval requests waiting for a decision
    pub async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>> {
        let response = self.client.get(self.url("/approval/pending")).send().await?;

        self.handle_response(response).await
    }

    /// Get an approval request by ID
    pub async fn get_approval(&self, request_id: Uuid) -> Result<ApprovalRequest> {
        let response = self
            .client
            .get(self.url(&format!("/approval/{}", request_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Approve or reject a pending request
    ///
    /// Fails with 404 when the request is unknown or expired, and 409 when
    /// it was already resolved.
    pub async fn resolve_approval(
        &self,
        request_id: Uuid,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        let response = self
            .client
            .post(self.url(&format!("/approval/{}/resolve", request_id)))
            .json(&ResolveApproval { decision, comment })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
