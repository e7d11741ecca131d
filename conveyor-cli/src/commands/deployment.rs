//! Deployment command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_core::domain::deployment::DeploymentPhase;

use crate::config::Config;

/// Deployment subcommands
#[derive(Subcommand)]
pub enum DeploymentCommands {
    /// Show the traffic state of a deploy target
    Status {
        /// Deploy target name
        #[arg(default_value = "default")]
        target: String,
    },
}

/// Handle deployment commands
pub async fn handle_deployment_command(command: DeploymentCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        DeploymentCommands::Status { target } => {
            let record = client.get_deployment(&target).await?;

            let phase = match record.phase {
                DeploymentPhase::Stable => record.phase.to_string().green(),
                DeploymentPhase::Shifting => record.phase.to_string().yellow(),
                DeploymentPhase::RolledBack => record.phase.to_string().red(),
            };

            println!("{} {}", "Target".bold(), record.target.cyan());
            println!("  Phase:     {}", phase.bold());
            println!(
                "  Current:   {}",
                record.current_revision.as_deref().unwrap_or("-")
            );
            if let Some(candidate) = &record.candidate_revision {
                println!("  Candidate: {}", candidate);
            }
            println!("  Traffic:   {}", record.split);
            if let Some(execution) = record.execution_id {
                println!("  Execution: #{}", execution);
            }
            println!(
                "  Updated:   {}",
                record.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}
