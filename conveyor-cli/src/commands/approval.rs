//! Approval command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::approval::{ApprovalRequest, ApprovalState, Decision};

use crate::config::Config;
use crate::id_resolver::resolve_approval_id;

/// Approval subcommands
#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List requests waiting for a decision
    List,
    /// Show an approval request
    Get {
        /// Request ID or unambiguous prefix of a pending request
        id: String,
    },
    /// Let the execution continue
    Approve {
        /// Request ID or unambiguous prefix of a pending request
        id: String,

        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Fail the execution at the approval gate
    Reject {
        /// Request ID or unambiguous prefix of a pending request
        id: String,

        #[arg(short, long)]
        comment: Option<String>,
    },
}

/// Handle approval commands
pub async fn handle_approval_command(command: ApprovalCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ApprovalCommands::List => list_pending(&client).await,
        ApprovalCommands::Get { id } => get_approval(&client, &id).await,
        ApprovalCommands::Approve { id, comment } => {
            resolve(&client, &id, Decision::Approved, comment).await
        }
        ApprovalCommands::Reject { id, comment } => {
            resolve(&client, &id, Decision::Rejected, comment).await
        }
    }
}

async fn list_pending(client: &OrchestratorClient) -> Result<()> {
    let pending = client.list_pending_approvals().await?;

    if pending.is_empty() {
        println!("{}", "No approvals pending.".yellow());
        return Ok(());
    }

    println!("{}", format!("{} approval(s) pending:", pending.len()).bold());
    println!();
    for request in &pending {
        print_request(request);
    }

    Ok(())
}

async fn get_approval(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_approval_id(client, id).await?;
    let request = client.get_approval(uuid).await?;

    print_request(&request);

    Ok(())
}

async fn resolve(
    client: &OrchestratorClient,
    id: &str,
    decision: Decision,
    comment: Option<String>,
) -> Result<()> {
    let uuid = resolve_approval_id(client, id).await?;
    let request = client.resolve_approval(uuid, decision, comment).await?;

    let verdict = match request.state {
        ApprovalState::Approved => "approved".green(),
        _ => "rejected".red(),
    };
    println!(
        "{} Execution #{} {} at {}/{}",
        "✓".green().bold(),
        request.execution_id,
        verdict.bold(),
        request.stage,
        request.action
    );

    Ok(())
}

fn print_request(request: &ApprovalRequest) {
    println!("  {} {}", "▸".cyan(), request.id.to_string().bold());
    println!("    Execution: #{}", request.execution_id);
    println!("    Gate:      {}/{}", request.stage, request.action);
    println!("    State:     {}", request.state.to_string().yellow());
    println!(
        "    Requested: {}",
        request.requested_at.format("%Y-%m-%d %H:%M:%S")
    );
    match request.expires_at {
        Some(deadline) => println!("    Expires:   {}", deadline.format("%Y-%m-%d %H:%M:%S")),
        None => println!("    Expires:   {}", "never".dimmed()),
    }
    if let Some(comment) = &request.comment {
        println!("    Comment:   {}", comment.dimmed());
    }
    println!();
}
