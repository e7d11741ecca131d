use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Single-connection in-memory pool; the database lives as long as the pool
pub async fn create_memory_pool() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id BLOB PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            stages TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create executions table; ids are handed out in increasing order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pipeline_id BLOB NOT NULL,
            pipeline_name TEXT NOT NULL,
            revision TEXT NOT NULL,
            status TEXT NOT NULL,
            stages TEXT NOT NULL,
            artifacts TEXT NOT NULL,
            failing_stage TEXT,
            failing_action TEXT,
            error TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create approval requests table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS approval_requests (
            id BLOB PRIMARY KEY,
            execution_id INTEGER NOT NULL,
            pipeline_id BLOB NOT NULL,
            stage TEXT NOT NULL,
            action TEXT NOT NULL,
            state TEXT NOT NULL,
            requested_at TEXT NOT NULL,
            expires_at TEXT,
            resolved_at TEXT,
            comment TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create artifacts table; the primary key enforces write-once
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            pipeline_id BLOB NOT NULL,
            name TEXT NOT NULL,
            execution_id INTEGER NOT NULL,
            digest TEXT NOT NULL,
            content BLOB NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (pipeline_id, name, execution_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create deployments table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployments (
            target TEXT PRIMARY KEY,
            current_revision TEXT,
            candidate_revision TEXT,
            blue_percentage INTEGER NOT NULL,
            green_percentage INTEGER NOT NULL,
            phase TEXT NOT NULL,
            execution_id INTEGER,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_pipeline_id ON executions(pipeline_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_approval_requests_execution ON approval_requests(execution_id, stage, action)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_approval_requests_state ON approval_requests(state)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
