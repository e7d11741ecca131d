//! ID resolver module
//!
//! Lets users type a short, unambiguous prefix instead of a full UUID.

use anyhow::{Context, Result, anyhow};
use conveyor_client::OrchestratorClient;
use uuid::Uuid;

/// Resolve a pipeline ID or prefix to a full UUID
pub async fn resolve_pipeline_id(client: &OrchestratorClient, input: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(input) {
        return Ok(uuid);
    }

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    match_prefix("pipeline", input, pipelines.iter().map(|p| p.id))
}

/// Resolve a pending approval request ID or prefix to a full UUID
pub async fn resolve_approval_id(client: &OrchestratorClient, input: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(input) {
        return Ok(uuid);
    }

    let pending = client
        .list_pending_approvals()
        .await
        .context("Failed to fetch pending approvals for ID resolution")?;

    match_prefix("pending approval", input, pending.iter().map(|r| r.id))
}

/// Pick the single id in `ids` that starts with `prefix`
fn match_prefix(kind: &str, prefix: &str, ids: impl Iterator<Item = Uuid>) -> Result<Uuid> {
    let prefix = prefix.to_lowercase();
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No {} found with ID starting with '{}'", kind, prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple {}s: {}",
                prefix,
                kind,
                ids.join(", ")
            ))
        }
    }
}
