//! Action Executor
//!
//! Performs exactly one attempt of an action: resolves its inputs from the
//! artifact store, dispatches on the action kind, enforces the timeout and
//! stores the declared outputs. Retries are the stage runner's business.

use conveyor_core::domain::approval::ApprovalState;
use conveyor_core::domain::artifact::ArtifactRef;
use conveyor_core::domain::duration;
use conveyor_core::domain::pipeline::{Action, ActionKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::engine::approval_gate::{ApprovalError, ApprovalGate, GateOutcome};
use crate::engine::artifact_store::{ArtifactStore, StoreError};
use crate::engine::blue_green::{BlueGreenDeployer, DeployError, DeploySettings};
use crate::engine::handler::{ActionContext, ActionHandler, ActionInput, Environment, RunContext};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("approval request {request_id} was {state}")]
    ApprovalDenied { request_id: Uuid, state: ApprovalState },

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Artifact(#[from] StoreError),
}

impl ActionError {
    /// Whether another attempt of the same action might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::ExecutionFailed(_) | ActionError::Timeout(_))
    }
}

impl From<DeployError> for ActionError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::HealthCheckFailed { .. } => ActionError::HealthCheckFailed(err.to_string()),
            DeployError::Cancelled => ActionError::Cancelled,
            DeployError::UnknownTarget(_) => ActionError::ConfigInvalid(err.to_string()),
            other => ActionError::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<ApprovalError> for ActionError {
    fn from(err: ApprovalError) -> Self {
        ActionError::ExecutionFailed(err.to_string())
    }
}

/// Reserved configuration keys understood by every action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionSettings {
    pub timeout: Option<Duration>,
    pub retries: u32,
}

impl ActionSettings {
    pub fn from_action(action: &Action) -> Result<Self, ActionError> {
        let timeout = match action.config_value("timeout") {
            Some(raw) => Some(duration::parse(raw).filter(|d| !d.is_zero()).ok_or_else(|| {
                ActionError::ConfigInvalid(format!("timeout '{}' is not a positive duration", raw))
            })?),
            None => None,
        };

        let retries = match action.config_value("retries") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                ActionError::ConfigInvalid(format!("retries '{}' is not a non-negative integer", raw))
            })?,
            None => 0,
        };

        Ok(Self { timeout, retries })
    }
}

pub struct ActionExecutor {
    store: Arc<ArtifactStore>,
    gate: Arc<ApprovalGate>,
    deployer: Arc<BlueGreenDeployer>,
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
    environment: Environment,
    default_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<ArtifactStore>,
        gate: Arc<ApprovalGate>,
        deployer: Arc<BlueGreenDeployer>,
        handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
        environment: Environment,
        default_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            deployer,
            handlers,
            environment,
            default_timeout,
        }
    }

    /// Run one attempt of `action` and return references to its outputs
    pub async fn execute(
        &self,
        run: &RunContext,
        stage: &str,
        action: &Action,
        inputs: &[ArtifactRef],
    ) -> Result<Vec<ArtifactRef>, ActionError> {
        if run.cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }

        let settings = ActionSettings::from_action(action)?;

        match action.kind {
            ActionKind::Approval => self.await_approval(run, stage, action, settings).await,
            ActionKind::BlueGreenDeploy => self.deploy(run, action, inputs).await,
            _ => self.run_handler(run, stage, action, inputs, settings).await,
        }
    }

    async fn await_approval(
        &self,
        run: &RunContext,
        stage: &str,
        action: &Action,
        settings: ActionSettings,
    ) -> Result<Vec<ArtifactRef>, ActionError> {
        match self.gate.request(run, stage, action, settings.timeout).await? {
            GateOutcome::Approved => Ok(Vec::new()),
            GateOutcome::Denied { request_id, state } => {
                Err(ActionError::ApprovalDenied { request_id, state })
            }
            GateOutcome::Cancelled => Err(ActionError::Cancelled),
        }
    }

    async fn deploy(
        &self,
        run: &RunContext,
        action: &Action,
        inputs: &[ArtifactRef],
    ) -> Result<Vec<ArtifactRef>, ActionError> {
        let settings = DeploySettings::from_action(action)
            .map_err(|e| ActionError::ConfigInvalid(e.to_string()))?;
        if !self.deployer.has_target(&settings.target) {
            return Err(ActionError::ConfigInvalid(format!(
                "unknown deploy target '{}'",
                settings.target
            )));
        }

        let artifact = inputs.first().ok_or_else(|| {
            ActionError::ConfigInvalid(format!(
                "blue/green action '{}' needs an input artifact to deploy",
                action.name
            ))
        })?;
        let content = self.store.get(artifact).await?;
        let revision = match std::str::from_utf8(&content) {
            Ok(label) if !label.trim().is_empty() => label.trim().to_string(),
            _ => artifact.digest.clone(),
        };

        self.deployer
            .deploy(run, &settings, &revision, &content)
            .await?;
        Ok(Vec::new())
    }

    async fn run_handler(
        &self,
        run: &RunContext,
        stage: &str,
        action: &Action,
        inputs: &[ArtifactRef],
        settings: ActionSettings,
    ) -> Result<Vec<ArtifactRef>, ActionError> {
        let handler = self.handlers.get(&action.kind).ok_or_else(|| {
            ActionError::ConfigInvalid(format!("no handler registered for {} actions", action.kind))
        })?;
        handler
            .validate(action)
            .map_err(|e| ActionError::ConfigInvalid(format!("{:#}", e)))?;

        // A resumed execution keeps what an earlier attempt already stored
        if let Some(existing) = self.already_stored(run, action).await? {
            tracing::debug!(
                execution_id = run.execution_id,
                action = %action.name,
                "Reusing outputs stored by an earlier attempt"
            );
            return Ok(existing);
        }

        let mut resolved = Vec::with_capacity(inputs.len());
        for artifact in inputs {
            resolved.push(ActionInput {
                artifact: artifact.clone(),
                content: self.store.get(artifact).await?,
            });
        }

        let ctx = ActionContext::new(run, stage, &self.environment);
        let limit = settings.timeout.unwrap_or(self.default_timeout);

        let output = tokio::select! {
            _ = run.cancel.cancelled() => return Err(ActionError::Cancelled),
            result = tokio::time::timeout(limit, handler.run(&ctx, action, &resolved)) => match result {
                Err(_) => return Err(ActionError::Timeout(limit)),
                Ok(Err(e)) => return Err(ActionError::ExecutionFailed(format!("{:#}", e))),
                Ok(Ok(output)) => output,
            },
        };

        // Nothing is stored unless every declared output was produced
        let missing: Vec<&str> = action
            .outputs
            .iter()
            .filter(|name| output.get(name).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ActionError::ExecutionFailed(format!(
                "declared output(s) not produced: {}",
                missing.join(", ")
            )));
        }

        let mut produced = Vec::with_capacity(action.outputs.len());
        for name in &action.outputs {
            let content = output.get(name).unwrap_or_default();
            let artifact = match self.store.stored(run.pipeline_id, run.execution_id, name).await? {
                Some(existing) => existing,
                None => {
                    self.store
                        .put(run.pipeline_id, run.execution_id, name, content)
                        .await?
                }
            };
            produced.push(artifact);
        }

        Ok(produced)
    }

    async fn already_stored(
        &self,
        run: &RunContext,
        action: &Action,
    ) -> Result<Option<Vec<ArtifactRef>>, ActionError> {
        if action.outputs.is_empty() {
            return Ok(None);
        }
        let mut existing = Vec::with_capacity(action.outputs.len());
        for name in &action.outputs {
            match self.store.stored(run.pipeline_id, run.execution_id, name).await? {
                Some(artifact) => existing.push(artifact),
                None => return Ok(None),
            }
        }
        Ok(Some(existing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use anyhow::bail;
    use async_trait::async_trait;
    use conveyor_core::domain::pipeline::ActionKind;
    use crate::engine::handler::ActionOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Scripted {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl Scripted {
        fn new(fail: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
                delay,
            })
        }
    }

    #[async_trait]
    impl ActionHandler for Scripted {
        async fn run(
            &self,
            _ctx: &ActionContext,
            action: &Action,
            inputs: &[ActionInput],
        ) -> anyhow::Result<ActionOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                bail!("collaborator reported failure");
            }
            let joined: Vec<u8> = inputs.iter().flat_map(|i| i.content.clone()).collect();
            Ok(action
                .outputs
                .iter()
                .fold(ActionOutput::new(), |out, name| out.with(name, joined.clone())))
        }
    }

    async fn executor(handler: Arc<Scripted>) -> (ActionExecutor, Arc<ArtifactStore>) {
        let pool = db::create_memory_pool().await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = Arc::new(ArtifactStore::new(pool.clone()));
        let gate = Arc::new(ApprovalGate::new(pool.clone(), None));
        let deployer = Arc::new(BlueGreenDeployer::new(pool, HashMap::new()));
        let mut handlers: HashMap<ActionKind, Arc<dyn ActionHandler>> = HashMap::new();
        handlers.insert(ActionKind::Build, handler);
        let executor = ActionExecutor::new(
            store.clone(),
            gate,
            deployer,
            handlers,
            Environment::new("acct", "region"),
            Duration::from_secs(5),
        );
        (executor, store)
    }

    fn run() -> RunContext {
        RunContext {
            execution_id: 1,
            pipeline_id: Uuid::new_v4(),
            pipeline_name: "demo".to_string(),
            revision: "r".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_settings_parse_reserved_keys() {
        let action = Action::new("b", ActionKind::Build)
            .config("timeout", "250ms")
            .config("retries", "2");
        let settings = ActionSettings::from_action(&action).unwrap();
        assert_eq!(settings.timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.retries, 2);

        let bad = Action::new("b", ActionKind::Build).config("retries", "many");
        assert!(matches!(
            ActionSettings::from_action(&bad),
            Err(ActionError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_only_execution_errors_are_retryable() {
        assert!(ActionError::ExecutionFailed("x".into()).is_retryable());
        assert!(ActionError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ActionError::ConfigInvalid("x".into()).is_retryable());
        assert!(!ActionError::Cancelled.is_retryable());
        assert!(!ActionError::HealthCheckFailed("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_outputs_are_stored() {
        let handler = Scripted::new(false, Duration::ZERO);
        let (executor, store) = executor(handler.clone()).await;
        let ctx = run();
        let source = store.put(ctx.pipeline_id, 1, "SourceOutput", b"src").await.unwrap();

        let action = Action::new("Compile", ActionKind::Build)
            .input("SourceOutput")
            .output("BuildOutput");
        let outputs = executor
            .execute(&ctx, "Build", &action, &[source])
            .await
            .unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "BuildOutput");
        assert_eq!(store.get(&outputs[0]).await.unwrap(), b"src");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_outputs_stored_by_earlier_attempt_are_reused() {
        let handler = Scripted::new(false, Duration::ZERO);
        let (executor, store) = executor(handler.clone()).await;
        let ctx = run();
        let earlier = store.put(ctx.pipeline_id, 1, "BuildOutput", b"first").await.unwrap();

        let action = Action::new("Compile", ActionKind::Build).output("BuildOutput");
        let outputs = executor.execute(&ctx, "Build", &action, &[]).await.unwrap();

        assert_eq!(outputs, vec![earlier]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_invoking_handler() {
        let handler = Scripted::new(false, Duration::ZERO);
        let (executor, _) = executor(handler.clone()).await;

        let action = Action::new("Compile", ActionKind::Build).config("timeout", "eventually");
        let err = executor.execute(&run(), "Build", &action, &[]).await.unwrap_err();

        assert!(matches!(err, ActionError::ConfigInvalid(_)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_handler_is_config_invalid() {
        let (executor, _) = executor(Scripted::new(false, Duration::ZERO)).await;
        let action = Action::new("Unit", ActionKind::Test);
        let err = executor.execute(&run(), "Test", &action, &[]).await.unwrap_err();
        assert!(matches!(err, ActionError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn test_handler_failure_is_execution_failed() {
        let (executor, _) = executor(Scripted::new(true, Duration::ZERO)).await;
        let action = Action::new("Compile", ActionKind::Build);
        let err = executor.execute(&run(), "Build", &action, &[]).await.unwrap_err();
        assert!(matches!(err, ActionError::ExecutionFailed(msg) if msg.contains("collaborator")));
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let (executor, _) = executor(Scripted::new(false, Duration::from_secs(5))).await;
        let action = Action::new("Compile", ActionKind::Build).config("timeout", "50ms");
        let err = executor.execute(&run(), "Build", &action, &[]).await.unwrap_err();
        assert!(matches!(err, ActionError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails() {
        let (executor, _) = executor(Scripted::new(false, Duration::ZERO)).await;

        struct Silent;
        #[async_trait]
        impl ActionHandler for Silent {
            async fn run(
                &self,
                _: &ActionContext,
                _: &Action,
                _: &[ActionInput],
            ) -> anyhow::Result<ActionOutput> {
                Ok(ActionOutput::new())
            }
        }
        let mut executor = executor;
        executor.handlers.insert(ActionKind::Test, Arc::new(Silent));

        let action = Action::new("Unit", ActionKind::Test).output("Report");
        let err = executor.execute(&run(), "Test", &action, &[]).await.unwrap_err();
        assert!(matches!(err, ActionError::ExecutionFailed(msg) if msg.contains("Report")));
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_start() {
        let handler = Scripted::new(false, Duration::ZERO);
        let (executor, _) = executor(handler.clone()).await;
        let ctx = run();
        ctx.cancel.cancel();

        let action = Action::new("Compile", ActionKind::Build);
        let err = executor.execute(&ctx, "Build", &action, &[]).await.unwrap_err();

        assert!(matches!(err, ActionError::Cancelled));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
    struct Partial {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActionHandler for Partial {
        async fn run(
            &self,
            _: &ActionContext,
            _: &Action,
            _: &[ActionInput],
        ) -> anyhow::Result<ActionOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let output = ActionOutput::new().with("Binary", b"bin".to_vec());
            Ok(if call == 0 { output } else { output.with("Checksums", b"sum".to_vec()) })
        }
    }

    #[tokio::test]
    async fn test_incomplete_outputs_store_nothing_so_a_retry_succeeds() {
        let (mut executor, store) = executor(Scripted::new(false, Duration::ZERO)).await;
        executor
            .handlers
            .insert(ActionKind::Test, Arc::new(Partial { calls: AtomicUsize::new(0) }));
        let ctx = run();
        let action = Action::new("Package", ActionKind::Test)
            .output("Binary")
            .output("Checksums");

        let err = executor.execute(&ctx, "Build", &action, &[]).await.unwrap_err();
        assert!(matches!(&err, ActionError::ExecutionFailed(msg) if msg.contains("Checksums")));
        assert!(err.is_retryable());
        assert!(store.stored(ctx.pipeline_id, 1, "Binary").await.unwrap().is_none());

        let outputs = executor.execute(&ctx, "Build", &action, &[]).await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(store.get(&outputs[0]).await.unwrap(), b"bin");
        assert_eq!(store.get(&outputs[1]).await.unwrap(), b"sum");
    }

    #[tokio::test]
    async fn test_partially_stored_outputs_are_completed() {
        let handler = Scripted::new(false, Duration::ZERO);
        let (executor, store) = executor(handler.clone()).await;
        let ctx = run();
        let earlier = store.put(ctx.pipeline_id, 1, "Binary", b"first").await.unwrap();

        let action = Action::new("Package", ActionKind::Build)
            .output("Binary")
            .output("Checksums");
        let outputs = executor.execute(&ctx, "Build", &action, &[]).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outputs[0], earlier);
        assert_eq!(outputs[1].name, "Checksums");
        assert!(store.stored(ctx.pipeline_id, 1, "Checksums").await.unwrap().is_some());
    }
}
