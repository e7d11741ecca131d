//! Pipeline engine
//!
//! Wires the artifact store, action executor, stage runner, scheduler,
//! approval gate, blue/green deployer and notifier together. Build one with
//! [`Engine::builder`].

pub mod approval_gate;
pub mod artifact_store;
pub mod blue_green;
pub mod events;
pub mod executor;
pub mod handler;
pub mod notifier;
pub mod scheduler;
pub mod stage_runner;

use conveyor_core::domain::pipeline::ActionKind;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use approval_gate::ApprovalGate;
use artifact_store::ArtifactStore;
use blue_green::{BlueGreenDeployer, DeployTarget};
use events::EventBus;
use executor::ActionExecutor;
use handler::{ActionHandler, CommandHandler, Environment, SourceHandler};
use notifier::{NotificationSink, Notifier};
use scheduler::{ConcurrencyPolicy, RecoveryReport, Scheduler};
use stage_runner::StageRunner;

/// Engine tuning, usually derived from [`OrchestratorConfig`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub action_timeout: Duration,
    pub approval_timeout: Option<Duration>,
    pub health_poll_interval: Duration,
    pub retire_grace_period: Duration,
    pub retry_backoff: Duration,
    pub concurrency_policy: ConcurrencyPolicy,
    pub environment: Environment,
    pub workspace_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for EngineConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            action_timeout: config.action_timeout,
            approval_timeout: config.approval_timeout,
            health_poll_interval: config.health_poll_interval,
            retire_grace_period: config.retire_grace_period,
            retry_backoff: config.retry_backoff,
            concurrency_policy: config.concurrency_policy,
            environment: Environment::new(&config.account, &config.region),
            workspace_dir: config.workspace_dir.clone(),
        }
    }
}

pub struct Engine {
    pool: SqlitePool,
    store: Arc<ArtifactStore>,
    gate: Arc<ApprovalGate>,
    deployer: Arc<BlueGreenDeployer>,
    scheduler: Arc<Scheduler>,
    events: EventBus,
}

impl Engine {
    pub fn builder(pool: SqlitePool, config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            pool,
            config,
            handlers: HashMap::new(),
            targets: HashMap::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    pub fn deployer(&self) -> &Arc<BlueGreenDeployer> {
        &self.deployer
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start forwarding failures to `sink`
    pub fn start_notifier(
        &self,
        sink: Arc<dyn NotificationSink>,
        recipient: impl Into<String>,
    ) -> JoinHandle<()> {
        Notifier::new(sink, recipient).spawn(self.events.subscribe())
    }

    /// Roll back interrupted deployments, then resume or fail interrupted
    /// executions
    pub async fn recover(&self) -> Result<RecoveryReport, sqlx::Error> {
        match self.deployer.recover().await {
            Ok(count) if count > 0 => tracing::info!("Rolled back {} interrupted deployment(s)", count),
            Ok(_) => {}
            Err(e) => tracing::error!("Deployment recovery failed: {}", e),
        }

        let report = self.scheduler.recover().await?;
        if !report.resumed.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                resumed = report.resumed.len(),
                failed = report.failed.len(),
                "Recovered interrupted executions"
            );
        }
        Ok(report)
    }
}

pub struct EngineBuilder {
    pool: SqlitePool,
    config: EngineConfig,
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
    targets: HashMap<String, Arc<dyn DeployTarget>>,
}

impl EngineBuilder {
    /// Bind `handler` to every action of `kind`
    pub fn handler(mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Source actions describe the trigger; build, test, publish and deploy
    /// actions run shell commands
    pub fn default_handlers(mut self) -> Self {
        let command: Arc<dyn ActionHandler> =
            Arc::new(CommandHandler::new(self.config.workspace_dir.clone()));
        self.handlers.insert(ActionKind::Source, Arc::new(SourceHandler));
        for kind in [
            ActionKind::Build,
            ActionKind::Test,
            ActionKind::ImagePublish,
            ActionKind::Deploy,
        ] {
            self.handlers.insert(kind, command.clone());
        }
        self
    }

    pub fn deploy_target(mut self, name: impl Into<String>, target: Arc<dyn DeployTarget>) -> Self {
        self.targets.insert(name.into(), target);
        self
    }

    pub fn build(self) -> Arc<Engine> {
        let config = self.config;
        let events = EventBus::new();

        let store = Arc::new(ArtifactStore::new(self.pool.clone()));
        let gate = Arc::new(ApprovalGate::new(self.pool.clone(), config.approval_timeout));
        let deployer = Arc::new(
            BlueGreenDeployer::new(self.pool.clone(), self.targets)
                .with_poll_interval(config.health_poll_interval)
                .with_retire_grace(config.retire_grace_period),
        );
        let executor = Arc::new(ActionExecutor::new(
            store.clone(),
            gate.clone(),
            deployer.clone(),
            self.handlers,
            config.environment,
            config.action_timeout,
        ));
        let runner = Arc::new(StageRunner::new(executor, config.retry_backoff));
        let scheduler = Arc::new(Scheduler::new(
            self.pool.clone(),
            runner,
            events.clone(),
            config.concurrency_policy,
        ));

        Arc::new(Engine {
            pool: self.pool,
            store,
            gate,
            deployer,
            scheduler,
            events,
        })
    }
}
