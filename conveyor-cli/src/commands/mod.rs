//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod approval;
mod deployment;
mod execution;
mod pipeline;

pub use approval::ApprovalCommands;
pub use deployment::DeploymentCommands;
pub use execution::ExecutionCommands;
pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Trigger, inspect and stop executions
    Execution {
        #[command(subcommand)]
        command: ExecutionCommands,
    },
    /// Manual approval gates
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
    /// Blue/green deploy targets
    Deployment {
        #[command(subcommand)]
        command: DeploymentCommands,
    },
}

/// Route a command to its handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Execution { command } => {
            execution::handle_execution_command(command, config).await
        }
        Commands::Approval { command } => approval::handle_approval_command(command, config).await,
        Commands::Deployment { command } => {
            deployment::handle_deployment_command(command, config).await
        }
    }
}

