//! Action Handlers
//!
//! A handler performs the side effect bound to an action kind. Handlers
//! receive their input artifacts as bytes and return the bytes of every
//! declared output; storing them is the executor's job.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use conveyor_core::domain::artifact::ArtifactRef;
use conveyor_core::domain::execution::ExecutionId;
use conveyor_core::domain::pipeline::Action;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Account and region the pipeline deploys into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub account: String,
    pub region: String,
}

impl Environment {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }
}

/// Identity of one execution, shared by all of its actions
#[derive(Debug, Clone)]
pub struct RunContext {
    pub execution_id: ExecutionId,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub revision: String,
    pub cancel: CancellationToken,
}

/// Everything a handler knows about the action it is running
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub execution_id: ExecutionId,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub stage: String,
    pub revision: String,
    pub environment: Environment,
    pub cancel: CancellationToken,
}

impl ActionContext {
    pub fn new(run: &RunContext, stage: &str, environment: &Environment) -> Self {
        Self {
            execution_id: run.execution_id,
            pipeline_id: run.pipeline_id,
            pipeline_name: run.pipeline_name.clone(),
            stage: stage.to_string(),
            revision: run.revision.clone(),
            environment: environment.clone(),
            cancel: run.cancel.clone(),
        }
    }
}

/// Resolved input artifact
#[derive(Debug, Clone)]
pub struct ActionInput {
    pub artifact: ArtifactRef,
    pub content: Vec<u8>,
}

/// Artifacts produced by a handler, keyed by output name
#[derive(Debug, Clone, Default)]
pub struct ActionOutput {
    artifacts: HashMap<String, Vec<u8>>,
}

impl ActionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(name, content);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.artifacts.insert(name.into(), content.into());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.artifacts.get(name).map(Vec::as_slice)
    }
}

/// External collaborator bound to an action kind
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Check the action's configuration without side effects
    fn validate(&self, _action: &Action) -> Result<()> {
        Ok(())
    }

    /// Perform one attempt of the action
    async fn run(
        &self,
        ctx: &ActionContext,
        action: &Action,
        inputs: &[ActionInput],
    ) -> Result<ActionOutput>;
}

/// Manufactures the initial artifact of an execution from its trigger.
///
/// The payload is a JSON description of the checked-out revision.
#[derive(Debug, Default)]
pub struct SourceHandler;

#[async_trait]
impl ActionHandler for SourceHandler {
    fn validate(&self, action: &Action) -> Result<()> {
        if action.outputs.is_empty() {
            bail!("source action '{}' declares no output", action.name);
        }
        Ok(())
    }

    async fn run(
        &self,
        ctx: &ActionContext,
        action: &Action,
        _inputs: &[ActionInput],
    ) -> Result<ActionOutput> {
        let payload = serde_json::json!({
            "revision": ctx.revision,
            "owner": action.config_value("owner"),
            "repo": action.config_value("repo"),
            "branch": action.config_value("branch").unwrap_or("main"),
        });
        let content = serde_json::to_vec(&payload)?;

        Ok(action
            .outputs
            .iter()
            .fold(ActionOutput::new(), |out, name| out.with(name, content.clone())))
    }
}

/// Runs the action's `command` through `sh -c` in a private workspace.
///
/// Layout of the workspace:
/// - `inputs/<name>`: content of each input artifact
/// - `outputs/<name>`: written by the command for each declared output
///
/// When exactly one output is declared and the command does not write it,
/// captured stdout is used instead.
#[derive(Debug)]
pub struct CommandHandler {
    workspace_root: PathBuf,
}

impl CommandHandler {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    fn workspace(&self, ctx: &ActionContext, action: &Action) -> PathBuf {
        self.workspace_root
            .join(ctx.execution_id.to_string())
            .join(sanitize(&ctx.stage))
            .join(sanitize(&action.name))
    }
}

#[async_trait]
impl ActionHandler for CommandHandler {
    fn validate(&self, action: &Action) -> Result<()> {
        match action.config_value("command") {
            Some(command) if !command.trim().is_empty() => Ok(()),
            _ => bail!("action '{}' has no 'command' configured", action.name),
        }
    }

    async fn run(
        &self,
        ctx: &ActionContext,
        action: &Action,
        inputs: &[ActionInput],
    ) -> Result<ActionOutput> {
        let command = action.config_value("command").unwrap_or_default();
        let workspace = self.workspace(ctx, action);
        let inputs_dir = workspace.join("inputs");
        let outputs_dir = workspace.join("outputs");

        tokio::fs::create_dir_all(&inputs_dir)
            .await
            .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;
        tokio::fs::create_dir_all(&outputs_dir).await?;

        for input in inputs {
            tokio::fs::write(inputs_dir.join(sanitize(&input.artifact.name)), &input.content)
                .await
                .with_context(|| format!("Failed to stage input {}", input.artifact))?;
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&workspace)
            .env("CONVEYOR_EXECUTION_ID", ctx.execution_id.to_string())
            .env("CONVEYOR_PIPELINE", &ctx.pipeline_name)
            .env("CONVEYOR_STAGE", &ctx.stage)
            .env("CONVEYOR_ACTION", &action.name)
            .env("CONVEYOR_REVISION", &ctx.revision)
            .env("CONVEYOR_ACCOUNT", &ctx.environment.account)
            .env("CONVEYOR_REGION", &ctx.environment.region)
            .env("CONVEYOR_INPUTS", &inputs_dir)
            .env("CONVEYOR_OUTPUTS", &outputs_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &action.configuration {
            if let Some(name) = key.strip_prefix("env.") {
                cmd.env(name, value);
            }
        }

        tracing::debug!(
            execution_id = ctx.execution_id,
            stage = %ctx.stage,
            action = %action.name,
            "Running command: {}",
            command
        );

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to spawn command for action '{}'", action.name))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "command exited with {}: {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                tail(stderr.trim(), 2048)
            );
        }

        let mut produced = ActionOutput::new();
        for name in &action.outputs {
            let path = outputs_dir.join(sanitize(name));
            match tokio::fs::read(&path).await {
                Ok(content) => produced.insert(name, content),
                Err(_) if action.outputs.len() == 1 => produced.insert(name, output.stdout.clone()),
                Err(_) => {}
            }
        }

        Ok(produced)
    }
}

/// Keep names usable as single path components
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::pipeline::ActionKind;

    fn context() -> ActionContext {
        ActionContext {
            execution_id: 4,
            pipeline_id: Uuid::new_v4(),
            pipeline_name: "demo".to_string(),
            stage: "Build".to_string(),
            revision: "abc123".to_string(),
            environment: Environment::new("123456789012", "us-east-1"),
            cancel: CancellationToken::new(),
        }
    }

    fn input(name: &str, content: &[u8]) -> ActionInput {
        ActionInput {
            artifact: ArtifactRef {
                pipeline_id: Uuid::new_v4(),
                name: name.to_string(),
                execution_id: 4,
                digest: "00".to_string(),
            },
            content: content.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_source_handler_describes_revision() {
        let action = Action::new("GitHub_Source", ActionKind::Source)
            .output("SourceOutput")
            .config("owner", "acme")
            .config("repo", "shop");

        let out = SourceHandler.run(&context(), &action, &[]).await.unwrap();

        let payload: serde_json::Value =
            serde_json::from_slice(out.get("SourceOutput").unwrap()).unwrap();
        assert_eq!(payload["revision"], "abc123");
        assert_eq!(payload["owner"], "acme");
        assert_eq!(payload["branch"], "main");
    }

    #[test]
    fn test_command_handler_requires_command() {
        let handler = CommandHandler::new(std::env::temp_dir());
        let action = Action::new("Build", ActionKind::Build);
        assert!(handler.validate(&action).is_err());
        assert!(handler.validate(&action.config("command", "make")).is_ok());
    }

    #[tokio::test]
    async fn test_command_reads_inputs_and_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let handler = CommandHandler::new(dir.path());
        let action = Action::new("Package", ActionKind::Build)
            .input("SourceOutput")
            .output("BuildOutput")
            .output("Report")
            .config(
                "command",
                "cat inputs/SourceOutput > outputs/BuildOutput && echo \"$CONVEYOR_REGION\" > outputs/Report",
            );

        let out = handler
            .run(&context(), &action, &[input("SourceOutput", b"sources")])
            .await
            .unwrap();

        assert_eq!(out.get("BuildOutput").unwrap(), b"sources");
        assert_eq!(out.get("Report").unwrap(), b"us-east-1\n");
    }

    #[tokio::test]
    async fn test_single_output_falls_back_to_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let handler = CommandHandler::new(dir.path());
        let action = Action::new("Tag", ActionKind::ImagePublish)
            .output("ImageUri")
            .config("command", "printf 'registry/app:%s' \"$CONVEYOR_REVISION\"");

        let out = handler.run(&context(), &action, &[]).await.unwrap();

        assert_eq!(out.get("ImageUri").unwrap(), b"registry/app:abc123");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let handler = CommandHandler::new(dir.path());
        let action = Action::new("Lint", ActionKind::Test)
            .config("command", "echo broken >&2; exit 3");

        let err = handler.run(&context(), &action, &[]).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("exited with 3"));
        assert!(message.contains("broken"));
    }

    #[test]
    fn test_sanitize_keeps_names_flat() {
        assert_eq!(sanitize("Code-Quality Testing"), "Code-Quality_Testing");
        assert_eq!(sanitize("../etc"), ".._etc");
    }
}
