//! Blue/Green Deployer
//!
//! Moves production traffic from the current revision (blue) to a candidate
//! (green) following a shift plan, watching health at every step. Any
//! failure after traffic started moving rolls the target back to 100% blue
//! before the error is reported, so a target is never left on a partial
//! split.

use anyhow::Result;
use async_trait::async_trait;
use conveyor_core::domain::deployment::{
    DeploymentPhase, DeploymentRecord, DeploymentRevision, HealthSignal, HealthThreshold,
    ShiftPlan, ShiftPlanError, TrafficSplit,
};
use conveyor_core::domain::pipeline::Action;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::handler::RunContext;
use crate::repository::deployment_repository;

const ROLLBACK_ATTEMPTS: u32 = 10;
const ROLLBACK_INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const ROLLBACK_MAX_BACKOFF: Duration = Duration::from_secs(5);
const SAVE_ATTEMPTS: u32 = 5;
const SAVE_INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// External system that owns production traffic for one service
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Revision currently serving production, if any
    async fn current_revision(&self) -> Result<Option<String>>;

    /// Bring up `revision` next to blue without production traffic
    async fn register_candidate(&self, revision: &str, artifact: &[u8]) -> Result<()>;

    /// Route `green_percentage` percent of production traffic to the candidate
    async fn shift_traffic(&self, green_percentage: u8) -> Result<()>;

    /// Latest health observation of the candidate
    async fn health_signal(&self) -> Result<HealthSignal>;

    /// Make the fully shifted candidate the revision of record
    async fn promote(&self, revision: &str) -> Result<()>;

    /// Tear down a revision that no longer serves traffic
    async fn retire(&self, revision: &str) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("unknown deploy target '{0}'")]
    UnknownTarget(String),

    #[error("a shift is already in progress on target '{0}'")]
    ShiftInProgress(String),

    #[error("deploy target '{target}' failed: {message}")]
    Collaborator { target: String, message: String },

    #[error("step {step} ({percentage}% green) degraded: {reason}; rolled back to blue")]
    HealthCheckFailed {
        step: usize,
        percentage: u8,
        reason: String,
    },

    #[error("deployment cancelled; rolled back to blue")]
    Cancelled,

    #[error("deployment database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Blue/green options read from action configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DeploySettings {
    pub target: String,
    pub plan: ShiftPlan,
    pub threshold: HealthThreshold,
}

impl DeploySettings {
    pub fn from_action(action: &Action) -> Result<Self, DeploySettingsError> {
        let target = action.config_value("target").unwrap_or("default").to_string();
        let plan = ShiftPlan::parse(action.config_value("shift_plan").unwrap_or("linear:10:60"))?;

        let mut threshold = HealthThreshold::default();
        if let Some(raw) = action.config_value("max_error_rate") {
            threshold.max_error_rate = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|r| (0.0..=1.0).contains(r))
                .ok_or_else(|| DeploySettingsError::Threshold("max_error_rate", raw.to_string()))?;
        }
        if let Some(raw) = action.config_value("max_latency_ms") {
            threshold.max_latency_ms = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| DeploySettingsError::Threshold("max_latency_ms", raw.to_string()))?;
        }

        Ok(Self {
            target,
            plan,
            threshold,
        })
    }
}

#[derive(Debug, Error)]
pub enum DeploySettingsError {
    #[error(transparent)]
    Plan(#[from] ShiftPlanError),

    #[error("{0} has invalid value '{1}'")]
    Threshold(&'static str, String),
}

enum HoldOutcome {
    Healthy,
    Degraded(String),
    Cancelled,
}

pub struct BlueGreenDeployer {
    pool: SqlitePool,
    targets: HashMap<String, Arc<dyn DeployTarget>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    poll_interval: Duration,
    retire_grace: Duration,
}

impl BlueGreenDeployer {
    pub fn new(pool: SqlitePool, targets: HashMap<String, Arc<dyn DeployTarget>>) -> Self {
        Self {
            pool,
            targets,
            locks: Mutex::new(HashMap::new()),
            poll_interval: Duration::from_secs(1),
            retire_grace: Duration::from_secs(300),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retire_grace(mut self, retire_grace: Duration) -> Self {
        self.retire_grace = retire_grace;
        self
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Persisted traffic state of a target
    pub async fn status(&self, target: &str) -> Result<Option<DeploymentRecord>, DeployError> {
        Ok(deployment_repository::find(&self.pool, target).await?)
    }

    /// Shift `settings.target` to `revision` following `settings.plan`
    pub async fn deploy(
        &self,
        run: &RunContext,
        settings: &DeploySettings,
        revision: &str,
        artifact: &[u8],
    ) -> Result<(), DeployError> {
        let name = settings.target.as_str();
        let target = self
            .targets
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::UnknownTarget(name.to_string()))?;

        // One shift per target at a time
        let _guard = self
            .lock_for(name)
            .try_lock_owned()
            .map_err(|_| DeployError::ShiftInProgress(name.to_string()))?;

        let blue = match unless_cancelled(&run.cancel, target.current_revision()).await {
            Some(current) => current.map_err(|e| collaborator(name, e))?,
            None => return Err(DeployError::Cancelled),
        };
        let cutover = DeploymentRevision {
            target: name.to_string(),
            blue: blue.clone().unwrap_or_default(),
            green: revision.to_string(),
        };

        tracing::info!(
            execution_id = run.execution_id,
            target = %name,
            blue = %cutover.blue,
            green = %cutover.green,
            steps = settings.plan.steps().len(),
            "Starting blue/green deployment"
        );

        let registered =
            unless_cancelled(&run.cancel, target.register_candidate(&cutover.green, artifact)).await;
        match registered {
            Some(result) => result.map_err(|e| collaborator(name, e))?,
            None => return Err(DeployError::Cancelled),
        }

        let mut record = DeploymentRecord {
            target: name.to_string(),
            current_revision: blue.clone(),
            candidate_revision: Some(cutover.green.clone()),
            split: TrafficSplit::all_blue(),
            phase: DeploymentPhase::Shifting,
            execution_id: Some(run.execution_id),
            updated_at: chrono::Utc::now(),
        };
        self.save(&mut record).await?;

        // From here on every failure restores 100% blue before returning
        for (index, step) in settings.plan.steps().iter().enumerate() {
            match unless_cancelled(&run.cancel, target.shift_traffic(step.percentage)).await {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    self.rollback(target.as_ref(), &mut record).await;
                    return Err(collaborator(name, e));
                }
                None => {
                    self.rollback(target.as_ref(), &mut record).await;
                    return Err(DeployError::Cancelled);
                }
            }

            record.split = TrafficSplit::with_green(step.percentage);
            if let Err(e) = self.save(&mut record).await {
                tracing::error!(target = %name, step = index + 1, "Failed to record traffic split: {}", e);
                self.rollback(target.as_ref(), &mut record).await;
                return Err(DeployError::Database(e));
            }

            tracing::info!(
                target = %name,
                step = index + 1,
                "Traffic shifted: {}",
                record.split
            );

            match self
                .hold(target.as_ref(), step.hold(), &settings.threshold, &run.cancel)
                .await
            {
                HoldOutcome::Healthy => {}
                HoldOutcome::Degraded(reason) => {
                    tracing::warn!(target = %name, step = index + 1, "Health degraded: {}", reason);
                    self.rollback(target.as_ref(), &mut record).await;
                    return Err(DeployError::HealthCheckFailed {
                        step: index + 1,
                        percentage: step.percentage,
                        reason,
                    });
                }
                HoldOutcome::Cancelled => {
                    self.rollback(target.as_ref(), &mut record).await;
                    return Err(DeployError::Cancelled);
                }
            }
        }

        // Promotion is the commit point and is not raced against cancellation
        if let Err(e) = target.promote(&cutover.green).await {
            self.rollback(target.as_ref(), &mut record).await;
            return Err(collaborator(name, e));
        }

        // Green is the new blue of record and carries all traffic
        record.current_revision = Some(cutover.green.clone());
        record.candidate_revision = None;
        record.split = TrafficSplit::all_blue();
        record.phase = DeploymentPhase::Stable;
        if let Err(e) = self.save_retrying(&mut record).await {
            // recover() reconciles a promoted target still recorded as Shifting
            tracing::error!(target = %name, "Failed to record promotion: {}", e);
        }

        tracing::info!(target = %name, revision = %cutover.green, "Deployment complete");

        if let Some(old) = blue.filter(|old| *old != cutover.green) {
            self.schedule_retirement(name, target, old);
        }

        Ok(())
    }

    /// Roll back every target left mid-shift by an interrupted process
    pub async fn recover(&self) -> Result<usize, DeployError> {
        let mut recovered = 0;
        for mut record in deployment_repository::find_shifting(&self.pool).await? {
            let Some(target) = self.targets.get(&record.target).cloned() else {
                tracing::warn!(target = %record.target, "Deploy target left mid-shift is not configured");
                continue;
            };
            let _guard = self.lock_for(&record.target).lock_owned().await;

            let serving = match target.current_revision().await {
                Ok(serving) => serving,
                Err(e) => {
                    tracing::warn!(target = %record.target, "Could not read current revision: {:#}", e);
                    None
                }
            };
            if serving.is_some() && serving == record.candidate_revision {
                tracing::info!(target = %record.target, "Interrupted deployment was already promoted");
                record.current_revision = record.candidate_revision.take();
                record.split = TrafficSplit::all_blue();
                record.phase = DeploymentPhase::Stable;
                self.save(&mut record).await?;
            } else {
                tracing::warn!(target = %record.target, "Rolling back interrupted deployment");
                self.rollback(target.as_ref(), &mut record).await;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Sample health until the hold elapses.
    ///
    /// Health is checked at least once per step, even for a zero hold.
    async fn hold(
        &self,
        target: &dyn DeployTarget,
        hold: Duration,
        threshold: &HealthThreshold,
        cancel: &CancellationToken,
    ) -> HoldOutcome {
        let deadline = Instant::now() + hold;
        loop {
            let signal = tokio::select! {
                biased;
                _ = cancel.cancelled() => return HoldOutcome::Cancelled,
                signal = target.health_signal() => signal,
            };
            match signal {
                Ok(signal) => {
                    if let Some(reason) = signal.degradation(threshold) {
                        return HoldOutcome::Degraded(reason);
                    }
                }
                Err(e) => return HoldOutcome::Degraded(format!("health signal unavailable: {:#}", e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return HoldOutcome::Healthy;
            }

            tokio::select! {
                _ = cancel.cancelled() => return HoldOutcome::Cancelled,
                _ = tokio::time::sleep(self.poll_interval.min(deadline - now)) => {}
            }
        }
    }

    /// Restore 100% blue. Not cancellable; retries with backoff.
    async fn rollback(&self, target: &dyn DeployTarget, record: &mut DeploymentRecord) {
        let mut backoff = ROLLBACK_INITIAL_BACKOFF;

        for attempt in 1..=ROLLBACK_ATTEMPTS {
            match target.shift_traffic(0).await {
                Ok(()) => {
                    record.split = TrafficSplit::all_blue();
                    record.phase = DeploymentPhase::RolledBack;
                    if let Err(e) = self.save(record).await {
                        tracing::error!(target = %record.target, "Failed to persist rollback: {}", e);
                    }
                    tracing::info!(target = %record.target, "Rolled back to 100% blue");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        target = %record.target,
                        attempt,
                        "Rollback attempt failed: {:#}",
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(ROLLBACK_MAX_BACKOFF);
                }
            }
        }

        // Record stays Shifting so recovery retries on next start
        tracing::error!(
            target = %record.target,
            "Rollback did not complete after {} attempts",
            ROLLBACK_ATTEMPTS
        );
    }

    fn schedule_retirement(&self, name: &str, target: Arc<dyn DeployTarget>, revision: String) {
        let grace = self.retire_grace;
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match target.retire(&revision).await {
                Ok(()) => tracing::info!(target = %name, revision = %revision, "Retired old revision"),
                Err(e) => tracing::warn!(
                    target = %name,
                    revision = %revision,
                    "Failed to retire old revision: {:#}",
                    e
                ),
            }
        });
    }

    async fn save(&self, record: &mut DeploymentRecord) -> Result<(), sqlx::Error> {
        record.updated_at = chrono::Utc::now();
        deployment_repository::upsert(&self.pool, record).await
    }

    async fn save_retrying(&self, record: &mut DeploymentRecord) -> Result<(), sqlx::Error> {
        let mut backoff = SAVE_INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.save(record).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= SAVE_ATTEMPTS => return Err(e),
                Err(e) => {
                    tracing::warn!(target = %record.target, attempt, "Deployment save failed: {}", e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }

    fn lock_for(&self, target: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.locks.lock() {
            Ok(mut locks) => locks.entry(target.to_string()).or_default().clone(),
            Err(poisoned) => poisoned
                .into_inner()
                .entry(target.to_string())
                .or_default()
                .clone(),
        }
    }
}

/// Await `call` unless `cancel` fires first
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    call: impl std::future::Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = call => Some(result),
    }
}

fn collaborator(target: &str, err: anyhow::Error) -> DeployError {
    DeployError::Collaborator {
        target: target.to_string(),
        message: format!("{:#}", err),
    }
}

/// Deploy target driven over HTTP by an external traffic controller.
///
/// Endpoints, relative to `base_url`:
/// - `GET revision` -> `{"revision": "..."|null}`
/// - `POST candidate` `{revision, artifact}`
/// - `POST traffic` `{green_percentage}`
/// - `GET health` -> `{error_rate, latency_ms}`
/// - `POST promote` / `POST retire` `{revision}`
pub struct HttpDeployTarget {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDeployTarget {
    /// Every request to the controller is bounded by `request_timeout`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<()> {
        self.client
            .post(format!("{}/{}", self.base_url, path))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl DeployTarget for HttpDeployTarget {
    async fn current_revision(&self) -> Result<Option<String>> {
        #[derive(serde::Deserialize)]
        struct Current {
            revision: Option<String>,
        }

        let current: Current = self
            .client
            .get(format!("{}/revision", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(current.revision)
    }

    async fn register_candidate(&self, revision: &str, artifact: &[u8]) -> Result<()> {
        let artifact = String::from_utf8_lossy(artifact);
        self.post(
            "candidate",
            serde_json::json!({ "revision": revision, "artifact": artifact }),
        )
        .await
    }

    async fn shift_traffic(&self, green_percentage: u8) -> Result<()> {
        self.post(
            "traffic",
            serde_json::json!({ "green_percentage": green_percentage }),
        )
        .await
    }

    async fn health_signal(&self) -> Result<HealthSignal> {
        Ok(self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn promote(&self, revision: &str) -> Result<()> {
        self.post("promote", serde_json::json!({ "revision": revision }))
            .await
    }

    async fn retire(&self, revision: &str) -> Result<()> {
        self.post("retire", serde_json::json!({ "revision": revision }))
            .await
    }
}
