//! Deployment Service
//!
//! Read access to the traffic state of blue/green deploy targets.

use conveyor_core::domain::deployment::DeploymentRecord;

use crate::engine::Engine;
use crate::engine::blue_green::DeployError;

/// Get the traffic record of a deploy target; `None` if it never deployed
pub async fn get_deployment(
    engine: &Engine,
    target: &str,
) -> Result<Option<DeploymentRecord>, DeployError> {
    engine.deployer().status(target).await
}
