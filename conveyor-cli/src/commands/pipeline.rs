//! Pipeline command handlers
//!
//! Creation, listing, inspection, redefinition and deletion of pipelines.
//! Definitions are JSON files holding `name`, `description` and `stages`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::pipeline::{Pipeline, PipelineDefinition};
use conveyor_core::dto::pipeline::PipelineSummary;
use std::path::Path;

use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a new pipeline from a JSON definition
    Create {
        /// Path to the definition file
        #[arg(short, long)]
        file: String,

        /// Override the pipeline name from the file
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Check a definition file without contacting the orchestrator
    Validate {
        /// Path to the definition file
        #[arg(short, long)]
        file: String,
    },
    /// List all pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Replace a pipeline's definition
    Update {
        /// Pipeline ID or unambiguous prefix
        id: String,

        /// Path to the new definition file
        #[arg(short, long)]
        file: String,
    },
    /// Delete a pipeline
    Delete {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::Create { file, name } => create_pipeline(&client, &file, name).await,
        PipelineCommands::Validate { file } => validate_definition(&file),
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Update { id, file } => update_pipeline(&client, &id, &file).await,
        PipelineCommands::Delete { id } => delete_pipeline(&client, &id).await,
    }
}

/// Read and parse a definition file
fn load_definition(path: impl AsRef<Path>) -> Result<PipelineDefinition> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse pipeline definition: {}", path.display()))
}

async fn create_pipeline(
    client: &OrchestratorClient,
    path: &str,
    name_override: Option<String>,
) -> Result<()> {
    let mut definition = load_definition(path)?;
    if let Some(name) = name_override {
        definition.name = name;
    }

    let pipeline = client.create_pipeline(definition).await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:     {}", pipeline.id.to_string().cyan());
    println!("  Name:   {}", pipeline.name.bold());
    println!("  Stages: {}", stage_names(&pipeline).dimmed());

    Ok(())
}

fn validate_definition(path: &str) -> Result<()> {
    let definition = load_definition(path)?;

    match definition.validate() {
        Ok(()) => {
            println!("{}", format!("✓ {} is valid", definition.name).green().bold());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red().bold(), e);
            Err(e.into())
        }
    }
}

async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let pipeline = client.get_pipeline(uuid).await?;

    print_pipeline_details(&pipeline);

    Ok(())
}

async fn update_pipeline(client: &OrchestratorClient, id: &str, path: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let definition = load_definition(path)?;

    let pipeline = client.update_pipeline(uuid, definition).await?;

    println!("{}", "✓ Pipeline updated successfully!".green().bold());
    println!("  ID:     {}", pipeline.id.to_string().cyan());
    println!("  Stages: {}", stage_names(&pipeline).dimmed());

    Ok(())
}

async fn delete_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;

    client.delete_pipeline(uuid).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", uuid)
            .green()
            .bold()
    );

    Ok(())
}

fn stage_names(pipeline: &Pipeline) -> String {
    pipeline
        .stages
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(" → ")
}

fn print_pipeline_summary(pipeline: &PipelineSummary) {
    println!("  {} {}", "▸".cyan(), pipeline.name.bold());
    println!("    ID:      {}", pipeline.id.to_string().dimmed());
    println!("    Stages:  {}", pipeline.stage_count.to_string().dimmed());
    println!(
        "    Created: {}",
        pipeline
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(desc) = &pipeline.description {
        println!("    Description: {}", desc.dimmed());
    }
    println!();
}

fn print_pipeline_details(pipeline: &Pipeline) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:          {}", pipeline.id.to_string().cyan());
    println!("  Name:        {}", pipeline.name.bold());
    if let Some(desc) = &pipeline.description {
        println!("  Description: {}", desc);
    }
    println!(
        "  Created:     {}",
        pipeline.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated:     {}",
        pipeline.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    println!("\n{}", "Stages:".bold());
    for (index, stage) in pipeline.stages.iter().enumerate() {
        println!("  {}. {}", index + 1, stage.name.bold());
        for (order, actions) in stage.groups() {
            for action in actions {
                let mut line = format!(
                    "     [{}] {} ({})",
                    order,
                    action.name,
                    action.kind.to_string().cyan()
                );
                if !action.inputs.is_empty() {
                    line.push_str(&format!(" ← {}", action.inputs.join(", ")));
                }
                if !action.outputs.is_empty() {
                    line.push_str(&format!(" → {}", action.outputs.join(", ")));
                }
                println!("{}", line);
            }
        }
    }
}
