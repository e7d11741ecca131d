//! Approval Service
//!
//! Business logic for listing and resolving approval requests.

use conveyor_core::domain::approval::ApprovalRequest;
use conveyor_core::dto::approval::ResolveApproval;
use uuid::Uuid;

use crate::engine::Engine;
use crate::engine::approval_gate::ApprovalError;

/// Resolve a pending approval request
pub async fn resolve_approval(
    engine: &Engine,
    id: Uuid,
    req: ResolveApproval,
) -> Result<ApprovalRequest, ApprovalError> {
    let comment = req
        .comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    engine.gate().resolve(id, req.decision, comment).await
}

/// Get an approval request by ID
pub async fn get_approval(engine: &Engine, id: Uuid) -> Result<ApprovalRequest, ApprovalError> {
    engine.gate().get(id).await
}

/// List requests waiting for a decision
pub async fn list_pending_approvals(engine: &Engine) -> Result<Vec<ApprovalRequest>, ApprovalError> {
    engine.gate().list_pending().await
}
