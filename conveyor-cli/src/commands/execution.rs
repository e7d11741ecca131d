//! Execution command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::execution::{ExecutionId, ExecutionStatus, StageStatus};
use conveyor_core::dto::execution::ExecutionStatusView;
use std::time::Duration;

use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;

/// Execution subcommands
#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// Start an execution for a source revision
    Trigger {
        /// Pipeline ID or unambiguous prefix
        pipeline: String,

        /// Source revision (commit, tag, ...)
        #[arg(short, long)]
        revision: String,

        /// Keep polling until the execution ends
        #[arg(short, long)]
        watch: bool,
    },
    /// Show the status of an execution
    Status {
        /// Execution number
        id: ExecutionId,

        /// Keep polling until the execution ends
        #[arg(short, long)]
        watch: bool,
    },
    /// List executions of a pipeline
    List {
        /// Pipeline ID or unambiguous prefix
        pipeline: String,
    },
    /// Stop a running execution
    Stop {
        /// Execution number
        id: ExecutionId,
    },
}

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Handle execution commands
pub async fn handle_execution_command(command: ExecutionCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ExecutionCommands::Trigger {
            pipeline,
            revision,
            watch,
        } => trigger_execution(&client, &pipeline, &revision, watch).await,
        ExecutionCommands::Status { id, watch } => show_status(&client, id, watch).await,
        ExecutionCommands::List { pipeline } => list_executions(&client, &pipeline).await,
        ExecutionCommands::Stop { id } => stop_execution(&client, id).await,
    }
}

async fn trigger_execution(
    client: &OrchestratorClient,
    pipeline: &str,
    revision: &str,
    watch: bool,
) -> Result<()> {
    let uuid = resolve_pipeline_id(client, pipeline).await?;

    let execution = match client.trigger_execution(uuid, revision).await {
        Err(e) if e.is_conflict() => {
            println!("{} {}", "✗".red().bold(), "Pipeline is busy".yellow());
            return Err(e.into());
        }
        other => other?,
    };

    println!("{}", "✓ Execution started!".green().bold());
    println!("  Execution: #{}", execution.id.to_string().cyan());
    println!("  Pipeline:  {}", execution.pipeline_name.bold());
    println!("  Revision:  {}", execution.revision.dimmed());

    if watch {
        println!();
        show_status(client, execution.id, true).await?;
    }

    Ok(())
}

async fn show_status(client: &OrchestratorClient, id: ExecutionId, watch: bool) -> Result<()> {
    let mut view = client.get_execution(id).await?;

    while watch && view.status == ExecutionStatus::Running {
        tokio::time::sleep(WATCH_INTERVAL).await;
        view = client.get_execution(id).await?;
    }

    print_status(&view);

    Ok(())
}

async fn list_executions(client: &OrchestratorClient, pipeline: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, pipeline).await?;
    let executions = client.list_executions(uuid).await?;

    if executions.is_empty() {
        println!("{}", "No executions found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} execution(s):", executions.len()).bold()
    );
    println!();
    for execution in executions {
        println!(
            "  {} #{} {} {}",
            "▸".cyan(),
            execution.id,
            colored_status(execution.status),
            execution.revision.dimmed()
        );
        println!(
            "    Started: {}",
            execution.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(done) = execution.completed_at {
            println!("    Ended:   {}", done.format("%Y-%m-%d %H:%M:%S"));
        }
    }

    Ok(())
}

async fn stop_execution(client: &OrchestratorClient, id: ExecutionId) -> Result<()> {
    client.stop_execution(id).await?;

    println!(
        "{}",
        format!("✓ Stop requested for execution #{}", id)
            .green()
            .bold()
    );

    Ok(())
}

fn colored_status(status: ExecutionStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ExecutionStatus::Running => label.yellow(),
        ExecutionStatus::Succeeded => label.green(),
        ExecutionStatus::Failed => label.red(),
        ExecutionStatus::Stopped => label.dimmed(),
    }
}

fn print_status(view: &ExecutionStatusView) {
    println!(
        "{} #{} {}",
        "Execution".bold(),
        view.id,
        colored_status(view.status).bold()
    );

    for stage in &view.stages {
        let marker = match stage.status {
            StageStatus::Succeeded => "✓".green(),
            StageStatus::Failed => "✗".red(),
            StageStatus::Running => "●".yellow(),
            StageStatus::Stopped => "■".dimmed(),
            StageStatus::Pending => "·".dimmed(),
        };
        println!("  {} {}", marker, stage.name);
    }

    if let Some(stage) = &view.failing_stage {
        println!();
        println!("  Failed at: {}", stage.red());
        if let Some(action) = &view.failing_action {
            println!("  Action:    {}", action.red());
        }
    }
    if let Some(error) = &view.error {
        println!("  Error:     {}", error);
    }
}
