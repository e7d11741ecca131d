//! Pipeline Scheduler
//!
//! Creates executions, drives them stage by stage on a background task and
//! publishes an event when each one ends. At most one execution per
//! pipeline runs at a time; what happens to a trigger that arrives while
//! one is running is decided by the [`ConcurrencyPolicy`].

use anyhow::bail;
use conveyor_core::domain::event::ExecutionEvent;
use conveyor_core::domain::execution::{
    Execution, ExecutionId, ExecutionStatus, StageStatus, Trigger,
};
use conveyor_core::domain::pipeline::Pipeline;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::events::EventBus;
use crate::engine::handler::RunContext;
use crate::engine::stage_runner::{StageError, StageRunner};
use crate::repository::{approval_repository, execution_repository, pipeline_repository};

/// Error recorded on executions that were running when the process died
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

const FINAL_SAVE_ATTEMPTS: u32 = 5;
const FINAL_SAVE_INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// What to do with a trigger for a pipeline that is already running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Refuse the trigger with `Busy`
    #[default]
    Reject,
    /// Stop the running execution, wait for it to end, then start
    Supersede,
}

impl FromStr for ConcurrencyPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ConcurrencyPolicy::Reject),
            "supersede" => Ok(ConcurrencyPolicy::Supersede),
            other => bail!("unknown concurrency policy '{}' (expected reject or supersede)", other),
        }
    }
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("pipeline {pipeline_id} is busy with execution #{execution_id}")]
    Busy {
        pipeline_id: Uuid,
        execution_id: ExecutionId,
    },

    #[error("scheduler database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of startup recovery
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: Vec<ExecutionId>,
    pub failed: Vec<ExecutionId>,
}

struct RunHandle {
    execution_id: ExecutionId,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

pub struct Scheduler {
    pool: SqlitePool,
    runner: Arc<StageRunner>,
    events: EventBus,
    policy: ConcurrencyPolicy,
    running: Mutex<HashMap<Uuid, RunHandle>>,
}

impl Scheduler {
    pub fn new(
        pool: SqlitePool,
        runner: Arc<StageRunner>,
        events: EventBus,
        policy: ConcurrencyPolicy,
    ) -> Self {
        Self {
            pool,
            runner,
            events,
            policy,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Start a new execution of `pipeline`
    pub async fn trigger(
        self: &Arc<Self>,
        pipeline: &Pipeline,
        trigger: Trigger,
    ) -> Result<Execution, TriggerError> {
        loop {
            let mut running = self.running.lock().await;

            if let Some(current) = running.get(&pipeline.id) {
                match self.policy {
                    ConcurrencyPolicy::Reject => {
                        return Err(TriggerError::Busy {
                            pipeline_id: pipeline.id,
                            execution_id: current.execution_id,
                        });
                    }
                    ConcurrencyPolicy::Supersede => {
                        tracing::info!(
                            pipeline_id = %pipeline.id,
                            execution_id = current.execution_id,
                            "Superseding running execution"
                        );
                        let mut done = current.done.clone();
                        current.cancel.cancel();
                        drop(running);
                        let _ = done.wait_for(|finished| *finished).await;
                        continue;
                    }
                }
            }

            let execution = execution_repository::create(&self.pool, pipeline, &trigger).await?;
            self.launch(&mut running, pipeline.clone(), execution.clone());

            tracing::info!(
                execution_id = execution.id,
                pipeline = %pipeline.name,
                revision = %execution.revision,
                "Execution triggered"
            );

            return Ok(execution);
        }
    }

    /// Ask a running execution to stop; false when it is not running
    pub async fn stop(&self, execution_id: ExecutionId) -> bool {
        let running = self.running.lock().await;
        match running.values().find(|h| h.execution_id == execution_id) {
            Some(handle) => {
                tracing::info!(execution_id, "Stopping execution");
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait until an execution is terminal and return its final record
    pub async fn wait(&self, execution_id: ExecutionId) -> Result<Option<Execution>, sqlx::Error> {
        let done = {
            let running = self.running.lock().await;
            running
                .values()
                .find(|h| h.execution_id == execution_id)
                .map(|h| h.done.clone())
        };

        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }

        execution_repository::find_by_id(&self.pool, execution_id).await
    }

    pub async fn is_running(&self, pipeline_id: Uuid) -> bool {
        self.running.lock().await.contains_key(&pipeline_id)
    }

    /// Number of executions currently driven by this process
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Pick up executions left Running by a previous process.
    ///
    /// An execution parked on a still-pending approval resumes at that
    /// stage with its persisted artifact set; every other one is failed.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport, sqlx::Error> {
        let mut report = RecoveryReport::default();

        for execution in execution_repository::find_running(&self.pool).await? {
            let pending =
                approval_repository::list_pending_by_execution(&self.pool, execution.id).await?;
            let parked_stage = execution.next_stage().map(|s| s.name.clone());
            let pipeline = pipeline_repository::find_by_id(&self.pool, execution.pipeline_id).await?;

            let resumable = match (&pipeline, &parked_stage) {
                (Some(pipeline), Some(stage)) => {
                    pipeline.stage(stage).is_some() && pending.iter().any(|r| &r.stage == stage)
                }
                _ => false,
            };

            let mut running = self.running.lock().await;
            match pipeline {
                Some(pipeline) if resumable && !running.contains_key(&pipeline.id) => {
                    tracing::info!(
                        execution_id = execution.id,
                        stage = parked_stage.as_deref().unwrap_or_default(),
                        "Resuming execution parked on approval"
                    );
                    report.resumed.push(execution.id);
                    self.launch(&mut running, pipeline, execution);
                }
                _ => {
                    drop(running);
                    tracing::warn!(execution_id = execution.id, "Failing interrupted execution");
                    report.failed.push(execution.id);
                    self.fail_interrupted(execution).await?;
                }
            }
        }

        Ok(report)
    }

    fn launch(
        self: &Arc<Self>,
        running: &mut HashMap<Uuid, RunHandle>,
        pipeline: Pipeline,
        execution: Execution,
    ) {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        running.insert(
            pipeline.id,
            RunHandle {
                execution_id: execution.id,
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.drive(pipeline, execution, cancel, done_tx).await;
        });
    }

    async fn drive(
        &self,
        pipeline: Pipeline,
        mut execution: Execution,
        cancel: CancellationToken,
        done: watch::Sender<bool>,
    ) {
        let run = RunContext {
            execution_id: execution.id,
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            revision: execution.revision.clone(),
            cancel: cancel.clone(),
        };

        for stage in &pipeline.stages {
            let status = execution.stage(&stage.name).map(|s| s.status);
            if status == Some(StageStatus::Succeeded) {
                continue;
            }

            if cancel.is_cancelled() {
                mark_stopped(&mut execution, &stage.name);
                break;
            }

            if let Some(state) = execution.stage_mut(&stage.name) {
                state.status = StageStatus::Running;
                state.started_at = Some(chrono::Utc::now());
            }
            self.persist(&execution).await;

            tracing::info!(
                execution_id = execution.id,
                stage = %stage.name,
                artifacts = execution.artifacts.len(),
                "Stage started"
            );

            match self.runner.run(&run, stage, &execution.artifacts).await {
                Ok(outputs) => {
                    if let Some(state) = execution.stage_mut(&stage.name) {
                        state.status = StageStatus::Succeeded;
                        state.completed_at = Some(chrono::Utc::now());
                    }
                    execution.artifacts.extend(outputs.iter().cloned());
                    self.persist(&execution).await;
                    tracing::info!(execution_id = execution.id, stage = %stage.name, "Stage succeeded");
                }
                Err(err) if err.is_cancelled() => {
                    mark_stopped(&mut execution, &stage.name);
                    break;
                }
                Err(err) => {
                    mark_failed(&mut execution, err);
                    break;
                }
            }
        }

        if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Succeeded;
        }
        execution.completed_at = Some(chrono::Utc::now());
        let recorded = self.persist_outcome(&execution).await;

        // Release siblings of a failed group that are still parked
        cancel.cancel();

        {
            let mut running = self.running.lock().await;
            if running
                .get(&execution.pipeline_id)
                .is_some_and(|h| h.execution_id == execution.id)
            {
                running.remove(&execution.pipeline_id);
            }
        }

        tracing::info!(
            execution_id = execution.id,
            pipeline = %execution.pipeline_name,
            "Execution {}",
            execution.status
        );

        // An unrecorded outcome is reported once by recovery on the next start
        if recorded {
            self.events.publish(ExecutionEvent::from(&execution));
        } else {
            tracing::error!(
                execution_id = execution.id,
                "Execution outcome was not persisted; it will be reported after restart"
            );
        }
        let _ = done.send(true);
    }

    async fn fail_interrupted(&self, mut execution: Execution) -> Result<(), sqlx::Error> {
        let stage = execution.next_stage().map(|s| s.name.clone());
        if let Some(state) = stage.as_deref().and_then(|name| execution.stage_mut(name)) {
            state.status = StageStatus::Failed;
            state.error = Some(INTERRUPTED_BY_RESTART.to_string());
            state.completed_at = Some(chrono::Utc::now());
        }
        execution.status = ExecutionStatus::Failed;
        execution.failing_stage = stage;
        execution.error = Some(INTERRUPTED_BY_RESTART.to_string());
        execution.completed_at = Some(chrono::Utc::now());

        execution_repository::save(&self.pool, &execution).await?;
        self.events.publish(ExecutionEvent::from(&execution));
        Ok(())
    }

    /// Save a terminal execution, retrying with backoff
    async fn persist_outcome(&self, execution: &Execution) -> bool {
        let mut backoff = FINAL_SAVE_INITIAL_BACKOFF;
        for attempt in 1..=FINAL_SAVE_ATTEMPTS {
            match execution_repository::save(&self.pool, execution).await {
                Ok(_) => return true,
                Err(e) => {
                    tracing::warn!(
                        execution_id = execution.id,
                        attempt,
                        "Failed to persist execution outcome: {}",
                        e
                    );
                    if attempt < FINAL_SAVE_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        false
    }

    async fn persist(&self, execution: &Execution) {
        if let Err(e) = execution_repository::save(&self.pool, execution).await {
            tracing::error!(execution_id = execution.id, "Failed to persist execution: {}", e);
        }
    }
}

fn mark_stopped(execution: &mut Execution, stage: &str) {
    if let Some(state) = execution.stage_mut(stage) {
        state.status = StageStatus::Stopped;
        state.completed_at = Some(chrono::Utc::now());
    }
    execution.status = ExecutionStatus::Stopped;
    execution.error = Some("execution stopped".to_string());
}

fn mark_failed(execution: &mut Execution, err: StageError) {
    tracing::warn!(execution_id = execution.id, "{}", err);

    let message = err.source.to_string();
    if let Some(state) = execution.stage_mut(&err.stage) {
        state.status = StageStatus::Failed;
        state.failing_action = Some(err.action.clone());
        state.error = Some(message.clone());
        state.completed_at = Some(chrono::Utc::now());
    }
    execution.status = ExecutionStatus::Failed;
    execution.failing_stage = Some(err.stage);
    execution.failing_action = Some(err.action);
    execution.error = Some(message);
}
