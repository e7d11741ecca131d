//! Deployment Repository
//!
//! Handles all database operations related to blue/green deploy targets.

use conveyor_core::domain::deployment::{DeploymentPhase, DeploymentRecord, TrafficSplit};
use sqlx::SqlitePool;

/// Find the traffic record of a deploy target
pub async fn find(pool: &SqlitePool, target: &str) -> Result<Option<DeploymentRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeploymentRow>(
        r#"
        SELECT target, current_revision, candidate_revision, green_percentage,
               phase, execution_id, updated_at
        FROM deployments
        WHERE target = ?
        "#,
    )
    .bind(target)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List targets left in the middle of a shift
pub async fn find_shifting(pool: &SqlitePool) -> Result<Vec<DeploymentRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeploymentRow>(
        r#"
        SELECT target, current_revision, candidate_revision, green_percentage,
               phase, execution_id, updated_at
        FROM deployments
        WHERE phase = ?
        "#,
    )
    .bind(phase_to_string(DeploymentPhase::Shifting))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Insert or replace the traffic record of a deploy target
pub async fn upsert(pool: &SqlitePool, record: &DeploymentRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO deployments
            (target, current_revision, candidate_revision, blue_percentage, green_percentage,
             phase, execution_id, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (target) DO UPDATE SET
            current_revision = excluded.current_revision,
            candidate_revision = excluded.candidate_revision,
            blue_percentage = excluded.blue_percentage,
            green_percentage = excluded.green_percentage,
            phase = excluded.phase,
            execution_id = excluded.execution_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.target)
    .bind(&record.current_revision)
    .bind(&record.candidate_revision)
    .bind(record.split.blue() as i64)
    .bind(record.split.green() as i64)
    .bind(phase_to_string(record.phase))
    .bind(record.execution_id)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    target: String,
    current_revision: Option<String>,
    candidate_revision: Option<String>,
    green_percentage: i64,
    phase: String,
    execution_id: Option<i64>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<DeploymentRow> for DeploymentRecord {
    fn from(row: DeploymentRow) -> Self {
        DeploymentRecord {
            target: row.target,
            current_revision: row.current_revision,
            candidate_revision: row.candidate_revision,
            split: TrafficSplit::with_green(row.green_percentage.clamp(0, 100) as u8),
            phase: string_to_phase(&row.phase),
            execution_id: row.execution_id,
            updated_at: row.updated_at,
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn phase_to_string(phase: DeploymentPhase) -> &'static str {
    match phase {
        DeploymentPhase::Stable => "Stable",
        DeploymentPhase::Shifting => "Shifting",
        DeploymentPhase::RolledBack => "RolledBack",
    }
}

fn string_to_phase(s: &str) -> DeploymentPhase {
    match s {
        "Shifting" => DeploymentPhase::Shifting,
        "RolledBack" => DeploymentPhase::RolledBack,
        _ => DeploymentPhase::Stable,
    }
}
