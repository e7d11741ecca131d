//! Fixtures shared by the integration tests

#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use conveyor_core::domain::approval::ApprovalRequest;
use conveyor_core::domain::deployment::HealthSignal;
use conveyor_core::domain::execution::StageStatus;
use conveyor_core::domain::pipeline::{
    Action, ActionKind, Pipeline, PipelineDefinition, Stage,
};
use conveyor_orchestrator::db;
use conveyor_orchestrator::engine::blue_green::DeployTarget;
use conveyor_orchestrator::engine::handler::{
    ActionContext, ActionHandler, ActionInput, ActionOutput,
};
use conveyor_orchestrator::engine::notifier::NotificationSink;
use conveyor_orchestrator::engine::scheduler::ConcurrencyPolicy;
use conveyor_orchestrator::engine::{Engine, EngineConfig};
use conveyor_orchestrator::repository::{execution_repository, pipeline_repository};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Writes `<action>@<revision>` (plus any input payloads) to every declared output.
///
/// Configuration:
/// - `fail`: fail every attempt
/// - `fail_times`: fail the first N attempts
/// - `sleep_ms`: sleep before answering
#[derive(Default)]
pub struct FakeHandler {
    pub calls: AtomicUsize,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FakeHandler {
    pub fn attempts(&self, action: &str) -> usize {
        self.attempts.lock().unwrap().get(action).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ActionHandler for FakeHandler {
    async fn run(
        &self,
        ctx: &ActionContext,
        action: &Action,
        inputs: &[ActionInput],
    ) -> Result<ActionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(action.name.clone()).or_default();
            *count += 1;
            *count - 1
        };

        if let Some(ms) = action.config_value("sleep_ms") {
            tokio::time::sleep(Duration::from_millis(ms.parse()?)).await;
        }
        if action.config_value("fail").is_some() {
            bail!("{} exited with status 2", action.name);
        }
        if let Some(times) = action.config_value("fail_times") {
            if attempt < times.parse::<usize>()? {
                bail!("{} flaked on attempt {}", action.name, attempt + 1);
            }
        }

        let mut payload = format!("{}@{}", action.name, ctx.revision).into_bytes();
        for input in inputs {
            payload.push(b'+');
            payload.extend_from_slice(&input.content);
        }
        Ok(action
            .outputs
            .iter()
            .fold(ActionOutput::new(), |out, name| out.with(name, payload.clone())))
    }
}

/// In-memory traffic controller
#[derive(Default)]
pub struct FakeTarget {
    pub shifts: Mutex<Vec<u8>>,
    pub current: Mutex<Option<String>>,
    pub candidates: Mutex<Vec<String>>,
    pub retired: Mutex<Vec<String>>,
    /// Report a 50% error rate once green reaches this percentage
    pub degrade_at: Option<u8>,
}

impl FakeTarget {
    pub fn serving(revision: &str) -> Self {
        Self {
            current: Mutex::new(Some(revision.to_string())),
            ..Default::default()
        }
    }

    pub fn degrading_at(revision: &str, percentage: u8) -> Self {
        Self {
            degrade_at: Some(percentage),
            ..Self::serving(revision)
        }
    }

    pub fn traffic(&self) -> u8 {
        self.shifts.lock().unwrap().last().copied().unwrap_or(0)
    }
}

#[async_trait]
impl DeployTarget for FakeTarget {
    async fn current_revision(&self) -> Result<Option<String>> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn register_candidate(&self, revision: &str, _artifact: &[u8]) -> Result<()> {
        self.candidates.lock().unwrap().push(revision.to_string());
        Ok(())
    }

    async fn shift_traffic(&self, green_percentage: u8) -> Result<()> {
        self.shifts.lock().unwrap().push(green_percentage);
        Ok(())
    }

    async fn health_signal(&self) -> Result<HealthSignal> {
        match self.degrade_at {
            Some(at) if self.traffic() >= at => Ok(HealthSignal {
                error_rate: 0.5,
                latency_ms: 20,
            }),
            _ => Ok(HealthSignal::healthy()),
        }
    }

    async fn promote(&self, revision: &str) -> Result<()> {
        *self.current.lock().unwrap() = Some(revision.to_string());
        Ok(())
    }

    async fn retire(&self, revision: &str) -> Result<()> {
        self.retired.lock().unwrap().push(revision.to_string());
        Ok(())
    }
}

/// Remembers every notification
#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, recipient: &str, message: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub handler: Arc<FakeHandler>,
    pub target: Arc<FakeTarget>,
    pub sink: Arc<RecordingSink>,
}

pub fn test_config(policy: ConcurrencyPolicy) -> EngineConfig {
    EngineConfig {
        action_timeout: Duration::from_secs(5),
        approval_timeout: None,
        health_poll_interval: Duration::from_millis(5),
        retire_grace_period: Duration::from_millis(10),
        retry_backoff: Duration::from_millis(10),
        concurrency_policy: policy,
        ..EngineConfig::default()
    }
}

pub async fn memory_pool() -> SqlitePool {
    let pool = db::create_memory_pool().await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub async fn harness(policy: ConcurrencyPolicy, target: FakeTarget) -> Harness {
    harness_on(memory_pool().await, policy, target)
}

/// Engine with fake collaborators for every action kind and a "web" deploy target
pub fn harness_on(pool: SqlitePool, policy: ConcurrencyPolicy, target: FakeTarget) -> Harness {
    let handler = Arc::new(FakeHandler::default());
    let target = Arc::new(target);
    let sink = Arc::new(RecordingSink::default());

    let mut builder = Engine::builder(pool, test_config(policy)).deploy_target("web", target.clone());
    for kind in [
        ActionKind::Source,
        ActionKind::Build,
        ActionKind::Test,
        ActionKind::ImagePublish,
        ActionKind::Deploy,
    ] {
        builder = builder.handler(kind, handler.clone());
    }
    let engine = builder.build();
    engine.start_notifier(sink.clone(), "oncall");

    Harness {
        engine,
        handler,
        target,
        sink,
    }
}

/// Source -> Build -> Approve -> Production (blue/green on "web")
pub fn release_pipeline(name: &str) -> PipelineDefinition {
    PipelineDefinition::builder(name)
        .stage(Stage::new("Source").action(Action::new("Checkout", ActionKind::Source).output("SourceOutput")))
        .stage(
            Stage::new("Build").action(
                Action::new("Compile", ActionKind::Build)
                    .input("SourceOutput")
                    .output("BuildOutput"),
            ),
        )
        .stage(Stage::new("Approve").action(Action::new("Signoff", ActionKind::Approval)))
        .stage(
            Stage::new("Production").action(
                Action::new("Cutover", ActionKind::BlueGreenDeploy)
                    .input("BuildOutput")
                    .config("target", "web")
                    .config("shift_plan", "25:10ms,50:10ms,100:0ms"),
            ),
        )
        .build()
        .unwrap()
}

/// Source -> Build with a configurable build action
pub fn build_pipeline(name: &str, compile: Action) -> PipelineDefinition {
    PipelineDefinition::builder(name)
        .stage(Stage::new("Source").action(Action::new("Checkout", ActionKind::Source).output("SourceOutput")))
        .stage(Stage::new("Build").action(compile.input("SourceOutput")))
        .build()
        .unwrap()
}

pub async fn store_pipeline(engine: &Engine, definition: PipelineDefinition) -> Pipeline {
    pipeline_repository::create(engine.pool(), definition).await.unwrap()
}

/// Poll until an approval request is pending for `execution_id`
pub async fn pending_approval(engine: &Engine, execution_id: i64) -> ApprovalRequest {
    for _ in 0..400 {
        let pending = engine.gate().list_pending().await.unwrap();
        if let Some(request) = pending.into_iter().find(|r| r.execution_id == execution_id) {
            return request;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no approval request raised for execution #{}", execution_id);
}

/// Poll until `stage` of `execution_id` has reached `status`
pub async fn wait_for_stage(engine: &Engine, execution_id: i64, stage: &str, status: StageStatus) {
    for _ in 0..400 {
        let execution = execution_repository::find_by_id(engine.pool(), execution_id)
            .await
            .unwrap()
            .unwrap();
        if execution.stage(stage).is_some_and(|s| s.status == status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stage {} of execution #{} never reached {}", stage, execution_id, status);
}

/// Let the notifier drain the event bus
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
