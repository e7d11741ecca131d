//! Stage Runner
//!
//! Runs the actions of one stage: run-order groups in ascending order,
//! actions of a group concurrently. The first failure in a group fails the
//! stage at once; siblings still in flight finish in the background and
//! their results are dropped.

use conveyor_core::domain::artifact::{ArtifactRef, ArtifactSet};
use conveyor_core::domain::pipeline::{Action, Stage};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::engine::executor::{ActionError, ActionExecutor, ActionSettings};
use crate::engine::handler::RunContext;

/// Failure of a stage, naming the action that caused it
#[derive(Debug, Error)]
#[error("stage '{stage}' failed at action '{action}': {source}")]
pub struct StageError {
    pub stage: String,
    pub action: String,
    #[source]
    pub source: ActionError,
}

impl StageError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, ActionError::Cancelled)
    }
}

pub struct StageRunner {
    executor: Arc<ActionExecutor>,
    retry_backoff: Duration,
}

impl StageRunner {
    pub fn new(executor: Arc<ActionExecutor>, retry_backoff: Duration) -> Self {
        Self {
            executor,
            retry_backoff,
        }
    }

    /// Run `stage` against `inputs` and return only the artifacts it produced
    pub async fn run(
        &self,
        run: &RunContext,
        stage: &Stage,
        inputs: &ArtifactSet,
    ) -> Result<ArtifactSet, StageError> {
        let mut available = inputs.clone();
        let mut produced = ArtifactSet::new();

        for (order, group) in stage.groups() {
            if run.cancel.is_cancelled() {
                let action = group.first().map(|a| a.name.clone()).unwrap_or_default();
                return Err(StageError {
                    stage: stage.name.clone(),
                    action,
                    source: ActionError::Cancelled,
                });
            }

            tracing::debug!(
                execution_id = run.execution_id,
                stage = %stage.name,
                run_order = order,
                actions = group.len(),
                "Starting action group"
            );

            let mut resolved = Vec::with_capacity(group.len());
            for action in group {
                let refs = resolve_inputs(action, &available).map_err(|source| StageError {
                    stage: stage.name.clone(),
                    action: action.name.clone(),
                    source,
                })?;
                resolved.push((action, refs));
            }

            let mut tasks = JoinSet::new();
            for (action, refs) in resolved {
                tasks.spawn(Self::attempt_with_retry(
                    self.executor.clone(),
                    run.clone(),
                    stage.name.clone(),
                    action.clone(),
                    refs,
                    self.retry_backoff,
                ));
            }

            let mut group_outputs = Vec::new();
            let mut cancelled: Option<StageError> = None;

            while let Some(joined) = tasks.join_next().await {
                let (action, result) = match joined {
                    Ok(done) => done,
                    Err(e) => (
                        String::new(),
                        Err(ActionError::ExecutionFailed(format!("action task failed: {}", e))),
                    ),
                };

                match result {
                    Ok(refs) => group_outputs.extend(refs),
                    Err(ActionError::Cancelled) => {
                        // Keep draining so in-flight actions observe the token
                        cancelled.get_or_insert(StageError {
                            stage: stage.name.clone(),
                            action,
                            source: ActionError::Cancelled,
                        });
                    }
                    Err(source) if cancelled.is_none() => {
                        tracing::warn!(
                            execution_id = run.execution_id,
                            stage = %stage.name,
                            action = %action,
                            "Action failed: {}",
                            source
                        );
                        tasks.detach_all();
                        return Err(StageError {
                            stage: stage.name.clone(),
                            action,
                            source,
                        });
                    }
                    Err(source) => {
                        tracing::debug!(action = %action, "Ignoring failure after cancellation: {}", source);
                    }
                }
            }

            if let Some(err) = cancelled {
                return Err(err);
            }

            available.extend(group_outputs.iter().cloned());
            produced.extend(group_outputs);
        }

        Ok(produced)
    }

    async fn attempt_with_retry(
        executor: Arc<ActionExecutor>,
        run: RunContext,
        stage: String,
        action: Action,
        inputs: Vec<ArtifactRef>,
        backoff: Duration,
    ) -> (String, Result<Vec<ArtifactRef>, ActionError>) {
        let retries = ActionSettings::from_action(&action)
            .map(|s| s.retries)
            .unwrap_or(0);
        let mut attempt = 0;

        let result = loop {
            let outcome = AssertUnwindSafe(executor.execute(&run, &stage, &action, &inputs))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(ActionError::ExecutionFailed("action handler panicked".to_string()))
                });

            match outcome {
                Err(err) if err.is_retryable() && attempt < retries => {
                    attempt += 1;
                    tracing::warn!(
                        execution_id = run.execution_id,
                        stage = %stage,
                        action = %action.name,
                        attempt,
                        retries,
                        "Retrying action: {}",
                        err
                    );
                    tokio::select! {
                        _ = run.cancel.cancelled() => break Err(ActionError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                other => break other,
            }
        };

        (action.name, result)
    }
}

fn resolve_inputs(action: &Action, available: &ArtifactSet) -> Result<Vec<ArtifactRef>, ActionError> {
    action
        .inputs
        .iter()
        .map(|name| {
            available.get(name).cloned().ok_or_else(|| {
                ActionError::ConfigInvalid(format!(
                    "input artifact '{}' of action '{}' is not available",
                    name, action.name
                ))
            })
        })
        .collect()
}
