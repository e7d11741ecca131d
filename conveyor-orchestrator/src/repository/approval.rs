//! Approval Repository
//!
//! Handles all database operations related to approval requests.

use conveyor_core::domain::approval::{ApprovalRequest, ApprovalState};
use conveyor_core::domain::execution::ExecutionId;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Insert a new approval request
pub async fn create(pool: &SqlitePool, request: &ApprovalRequest) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO approval_requests
            (id, execution_id, pipeline_id, stage, action, state, requested_at, expires_at, resolved_at, comment)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(request.id)
    .bind(request.execution_id)
    .bind(request.pipeline_id)
    .bind(&request.stage)
    .bind(&request.action)
    .bind(state_to_string(request.state))
    .bind(request.requested_at)
    .bind(request.expires_at)
    .bind(request.resolved_at)
    .bind(&request.comment)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find an approval request by ID
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<ApprovalRequest>, sqlx::Error> {
    let row = sqlx::query_as::<_, ApprovalRow>(
        r#"
        SELECT id, execution_id, pipeline_id, stage, action, state, requested_at,
               expires_at, resolved_at, comment
        FROM approval_requests
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Latest request raised by a given approval action of an execution
pub async fn find_for_action(
    pool: &SqlitePool,
    execution_id: ExecutionId,
    stage: &str,
    action: &str,
) -> Result<Option<ApprovalRequest>, sqlx::Error> {
    let row = sqlx::query_as::<_, ApprovalRow>(
        r#"
        SELECT id, execution_id, pipeline_id, stage, action, state, requested_at,
               expires_at, resolved_at, comment
        FROM approval_requests
        WHERE execution_id = ? AND stage = ? AND action = ?
        ORDER BY requested_at DESC
        LIMIT 1
        "#,
    )
    .bind(execution_id)
    .bind(stage)
    .bind(action)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List pending requests, oldest first
pub async fn list_pending(pool: &SqlitePool) -> Result<Vec<ApprovalRequest>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ApprovalRow>(
        r#"
        SELECT id, execution_id, pipeline_id, stage, action, state, requested_at,
               expires_at, resolved_at, comment
        FROM approval_requests
        WHERE state = ?
        ORDER BY requested_at ASC
        "#,
    )
    .bind(state_to_string(ApprovalState::Pending))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List pending requests belonging to one execution
pub async fn list_pending_by_execution(
    pool: &SqlitePool,
    execution_id: ExecutionId,
) -> Result<Vec<ApprovalRequest>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ApprovalRow>(
        r#"
        SELECT id, execution_id, pipeline_id, stage, action, state, requested_at,
               expires_at, resolved_at, comment
        FROM approval_requests
        WHERE execution_id = ? AND state = ?
        ORDER BY requested_at ASC
        "#,
    )
    .bind(execution_id)
    .bind(state_to_string(ApprovalState::Pending))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Move a request out of Pending.
///
/// Only succeeds while the request is still Pending, so at most one
/// resolution ever wins.
pub async fn resolve(
    pool: &SqlitePool,
    id: Uuid,
    state: ApprovalState,
    comment: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE approval_requests
        SET state = ?, comment = ?, resolved_at = ?
        WHERE id = ? AND state = ?
        "#,
    )
    .bind(state_to_string(state))
    .bind(comment)
    .bind(chrono::Utc::now())
    .bind(id)
    .bind(state_to_string(ApprovalState::Pending))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: Uuid,
    execution_id: i64,
    pipeline_id: Uuid,
    stage: String,
    action: String,
    state: String,
    requested_at: chrono::DateTime<chrono::Utc>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    resolved_at: Option<chrono::DateTime<chrono::Utc>>,
    comment: Option<String>,
}

impl From<ApprovalRow> for ApprovalRequest {
    fn from(row: ApprovalRow) -> Self {
        ApprovalRequest {
            id: row.id,
            execution_id: row.execution_id,
            pipeline_id: row.pipeline_id,
            stage: row.stage,
            action: row.action,
            state: string_to_state(&row.state),
            requested_at: row.requested_at,
            expires_at: row.expires_at,
            resolved_at: row.resolved_at,
            comment: row.comment,
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn state_to_string(state: ApprovalState) -> &'static str {
    match state {
        ApprovalState::Pending => "Pending",
        ApprovalState::Approved => "Approved",
        ApprovalState::Rejected => "Rejected",
        ApprovalState::Expired => "Expired",
    }
}

fn string_to_state(s: &str) -> ApprovalState {
    match s {
        "Approved" => ApprovalState::Approved,
        "Rejected" => ApprovalState::Rejected,
        "Expired" => ApprovalState::Expired,
        _ => ApprovalState::Pending,
    }
}
