//! Approval API Handlers
//!
//! HTTP endpoints for the manual approval gate.

use axum::{
    Json,
    extract::{Path, State},
};
use conveyor_core::domain::approval::ApprovalRequest;
use conveyor_core::dto::approval::ResolveApproval;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::engine::approval_gate::ApprovalError;
use crate::service::approval_service;

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotFound(id) => {
                ApiError::NotFound(format!("Approval request {} not found", id))
            }
            ApprovalError::Expired(id) => {
                ApiError::NotFound(format!("Approval request {} has expired", id))
            }
            ApprovalError::AlreadyResolved { id, state } => {
                ApiError::Conflict(format!("Approval request {} is already {}", id, state))
            }
            ApprovalError::Database(err) => ApiError::Database(err),
        }
    }
}

/// GET /approval/pending
/// List requests waiting for a decision
pub async fn list_pending_approvals(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ApprovalRequest>>> {
    tracing::debug!("Listing pending approvals");

    let requests = approval_service::list_pending_approvals(&state).await?;

    Ok(Json(requests))
}

/// GET /approval/{id}
/// Get an approval request by ID
pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApprovalRequest>> {
    tracing::debug!("Getting approval request: {}", id);

    let request = approval_service::get_approval(&state, id).await?;

    Ok(Json(request))
}

/// POST /approval/{id}/resolve
/// Approve or reject a pending request
pub async fn resolve_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveApproval>,
) -> ApiResult<Json<ApprovalRequest>> {
    tracing::info!("Resolving approval request {}: {:?}", id, req.decision);

    let request = approval_service::resolve_approval(&state, id, req).await?;

    Ok(Json(request))
}
