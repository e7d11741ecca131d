//! Liveness of the orchestrator and its database

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::api::AppState;

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    database: String,
    running_executions: usize,
}

/// GET /health
/// 200 while the database answers, 503 otherwise
pub async fn health_check(State(engine): State<AppState>) -> impl IntoResponse {
    let running_executions = engine.scheduler().running_count().await;

    match sqlx::query("SELECT 1").execute(engine.pool()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthReport {
                status: "ok",
                database: "ok".to_string(),
                running_executions,
            }),
        ),
        Err(e) => {
            tracing::warn!("Health check failed to reach the database: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport {
                    status: "degraded",
                    database: e.to_string(),
                    running_executions,
                }),
            )
        }
    }
}
