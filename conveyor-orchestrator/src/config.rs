//! Orchestrator Configuration
//!
//! Settings are read from environment variables with sensible defaults.

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::scheduler::ConcurrencyPolicy;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub database_url: String,
    pub bind_addr: String,
    /// Default per-action timeout
    pub action_timeout: Duration,
    /// Default approval timeout, `None` disables expiry
    pub approval_timeout: Option<Duration>,
    /// How often health is sampled while holding a shift step
    pub health_poll_interval: Duration,
    /// Delay between a finished cutover and retiring the old revision
    pub retire_grace_period: Duration,
    /// Delay between retries of a failed action
    pub retry_backoff: Duration,
    pub concurrency_policy: ConcurrencyPolicy,
    pub notify_recipient: String,
    /// Failure notifications are POSTed here when set, otherwise logged
    pub notify_webhook_url: Option<String>,
    /// Base URL of the traffic controller backing the `default` deploy target
    pub deploy_target_url: Option<String>,
    /// Per-request timeout for calls to the traffic controller
    pub deploy_target_timeout: Duration,
    /// Root directory for command action workspaces
    pub workspace_dir: PathBuf,
    pub account: String,
    pub region: String,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: std::env::var("ORCHESTRATOR_BIND_ADDR").unwrap_or(defaults.bind_addr),
            action_timeout: env_secs("ACTION_TIMEOUT")?.unwrap_or(defaults.action_timeout),
            approval_timeout: match env_secs("APPROVAL_TIMEOUT")? {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.approval_timeout,
            },
            health_poll_interval: env_millis("HEALTH_POLL_INTERVAL")?
                .unwrap_or(defaults.health_poll_interval),
            retire_grace_period: env_secs("RETIRE_GRACE_PERIOD")?
                .unwrap_or(defaults.retire_grace_period),
            retry_backoff: env_millis("RETRY_BACKOFF")?.unwrap_or(defaults.retry_backoff),
            concurrency_policy: match std::env::var("CONCURRENCY_POLICY") {
                Ok(raw) => raw.parse()?,
                Err(_) => defaults.concurrency_policy,
            },
            notify_recipient: std::env::var("NOTIFY_RECIPIENT")
                .unwrap_or(defaults.notify_recipient),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
            deploy_target_url: std::env::var("DEPLOY_TARGET_URL").ok(),
            deploy_target_timeout: env_secs("DEPLOY_TARGET_TIMEOUT")?
                .unwrap_or(defaults.deploy_target_timeout),
            workspace_dir: std::env::var("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_dir),
            account: std::env::var("ACCOUNT").unwrap_or(defaults.account),
            region: std::env::var("REGION").unwrap_or(defaults.region),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            bail!("database_url cannot be empty");
        }

        if self.bind_addr.is_empty() {
            bail!("bind_addr cannot be empty");
        }

        if self.action_timeout.is_zero() {
            bail!("action_timeout must be greater than 0");
        }

        if self.health_poll_interval.is_zero() {
            bail!("health_poll_interval must be greater than 0");
        }

        if self.deploy_target_timeout.is_zero() {
            bail!("deploy_target_timeout must be greater than 0");
        }

        if self.notify_recipient.is_empty() {
            bail!("notify_recipient cannot be empty");
        }

        if self.account.is_empty() || self.region.is_empty() {
            bail!("account and region must be set");
        }

        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://conveyor.db?mode=rwc".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            action_timeout: Duration::from_secs(3600),
            approval_timeout: Some(Duration::from_secs(7 * 24 * 3600)),
            health_poll_interval: Duration::from_millis(1000),
            retire_grace_period: Duration::from_secs(300),
            retry_backoff: Duration::from_secs(5),
            concurrency_policy: ConcurrencyPolicy::Reject,
            notify_recipient: "pipeline-admins".to_string(),
            notify_webhook_url: None,
            deploy_target_url: None,
            deploy_target_timeout: Duration::from_secs(30),
            workspace_dir: std::env::temp_dir().join("conveyor"),
            account: "local".to_string(),
            region: "local".to_string(),
        }
    }
}

fn env_secs(key: &str) -> Result<Option<Duration>> {
    parse_env(key).map(|v| v.map(Duration::from_secs))
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    parse_env(key).map(|v| v.map(Duration::from_millis))
}

fn parse_env(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => bail!("{} must be a non-negative integer, got '{}'", key, raw),
        },
        Err(_) => Ok(None),
    }
}
