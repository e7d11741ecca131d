//! Blue/green deployment domain types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::duration;
use crate::domain::execution::ExecutionId;

/// Percentage of production traffic on each revision; always sums to 100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplit {
    blue: u8,
    green: u8,
}

impl TrafficSplit {
    pub fn all_blue() -> Self {
        Self { blue: 100, green: 0 }
    }

    /// Split with `green` percent on the candidate, saturating at 100
    pub fn with_green(green: u8) -> Self {
        let green = green.min(100);
        Self {
            blue: 100 - green,
            green,
        }
    }

    pub fn blue(&self) -> u8 {
        self.blue
    }

    pub fn green(&self) -> u8 {
        self.green
    }
}

impl Default for TrafficSplit {
    fn default() -> Self {
        Self::all_blue()
    }
}

impl std::fmt::Display for TrafficSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "blue {}% / green {}%", self.blue, self.green)
    }
}

/// Pair of revisions taking part in one cutover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRevision {
    pub target: String,
    /// Current revision of record
    pub blue: String,
    /// Candidate revision
    pub green: String,
}

/// One step of a shift plan: move to `percentage` green, then hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftStep {
    pub percentage: u8,
    pub hold_ms: u64,
}

impl ShiftStep {
    pub fn new(percentage: u8, hold: Duration) -> Self {
        Self {
            percentage,
            hold_ms: hold.as_millis() as u64,
        }
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

/// Ordered list of traffic-shift steps ending at 100% green
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftPlan {
    steps: Vec<ShiftStep>,
}

impl ShiftPlan {
    pub fn new(steps: Vec<ShiftStep>) -> Result<Self, ShiftPlanError> {
        if steps.is_empty() {
            return Err(ShiftPlanError::Empty);
        }
        let mut previous = 0u8;
        for step in &steps {
            if step.percentage == 0 || step.percentage > 100 {
                return Err(ShiftPlanError::OutOfRange(step.percentage));
            }
            if step.percentage <= previous {
                return Err(ShiftPlanError::NotIncreasing(step.percentage));
            }
            previous = step.percentage;
        }
        if previous != 100 {
            return Err(ShiftPlanError::Incomplete(previous));
        }
        Ok(Self { steps })
    }

    /// Shift `increment` percent every `interval` until fully shifted
    pub fn linear(increment: u8, interval: Duration) -> Result<Self, ShiftPlanError> {
        if increment == 0 || increment > 100 {
            return Err(ShiftPlanError::OutOfRange(increment));
        }
        let mut steps = Vec::new();
        let mut current = 0u8;
        while current < 100 {
            current = current.saturating_add(increment).min(100);
            steps.push(ShiftStep::new(current, interval));
        }
        Self::new(steps)
    }

    /// Move everything in one step
    pub fn all_at_once() -> Self {
        Self {
            steps: vec![ShiftStep::new(100, Duration::ZERO)],
        }
    }

    /// Parse a plan from action configuration.
    ///
    /// Accepted forms:
    /// - `"25:30s,50:30s,100:0s"` explicit steps (`ms`, `s` or `m`, bare numbers are seconds)
    /// - `"linear:10:1m"` linear increments
    /// - `"all_at_once"`
    pub fn parse(plan: &str) -> Result<Self, ShiftPlanError> {
        let plan = plan.trim();
        if plan == "all_at_once" {
            return Ok(Self::all_at_once());
        }

        if let Some(rest) = plan.strip_prefix("linear:") {
            let (increment, interval) = rest
                .split_once(':')
                .ok_or_else(|| ShiftPlanError::Malformed(plan.to_string()))?;
            let increment = increment
                .trim()
                .parse::<u8>()
                .map_err(|_| ShiftPlanError::Malformed(plan.to_string()))?;
            return Self::linear(increment, parse_duration(interval)?);
        }

        let steps = plan
            .split(',')
            .map(|part| {
                let (percentage, hold) = part
                    .split_once(':')
                    .ok_or_else(|| ShiftPlanError::Malformed(part.to_string()))?;
                let percentage = percentage
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| ShiftPlanError::Malformed(part.to_string()))?;
                Ok(ShiftStep::new(percentage, parse_duration(hold)?))
            })
            .collect::<Result<Vec<_>, ShiftPlanError>>()?;

        Self::new(steps)
    }

    pub fn steps(&self) -> &[ShiftStep] {
        &self.steps
    }
}

fn parse_duration(raw: &str) -> Result<Duration, ShiftPlanError> {
    duration::parse(raw).ok_or_else(|| ShiftPlanError::Malformed(raw.trim().to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShiftPlanError {
    #[error("shift plan has no steps")]
    Empty,

    #[error("shift percentage {0} is outside 1..=100")]
    OutOfRange(u8),

    #[error("shift percentage {0} does not increase over the previous step")]
    NotIncreasing(u8),

    #[error("shift plan stops at {0}% instead of 100%")]
    Incomplete(u8),

    #[error("malformed shift plan entry '{0}'")]
    Malformed(String),
}

/// Abort rule applied to every health observation during a hold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThreshold {
    pub max_error_rate: f64,
    pub max_latency_ms: u64,
}

impl Default for HealthThreshold {
    fn default() -> Self {
        Self {
            max_error_rate: 0.05,
            max_latency_ms: 1000,
        }
    }
}

/// Health observation reported by a deploy target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSignal {
    /// Fraction of failed requests, 0.0..=1.0
    pub error_rate: f64,
    pub latency_ms: u64,
}

impl HealthSignal {
    pub fn healthy() -> Self {
        Self {
            error_rate: 0.0,
            latency_ms: 0,
        }
    }

    /// Reason the signal breaches `threshold`, if it does
    pub fn degradation(&self, threshold: &HealthThreshold) -> Option<String> {
        if self.error_rate > threshold.max_error_rate {
            return Some(format!(
                "error rate {:.3} exceeds {:.3}",
                self.error_rate, threshold.max_error_rate
            ));
        }
        if self.latency_ms > threshold.max_latency_ms {
            return Some(format!(
                "latency {}ms exceeds {}ms",
                self.latency_ms, threshold.max_latency_ms
            ));
        }
        None
    }
}

/// Persisted traffic state of one deploy target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub target: String,
    pub current_revision: Option<String>,
    pub candidate_revision: Option<String>,
    pub split: TrafficSplit,
    pub phase: DeploymentPhase,
    pub execution_id: Option<ExecutionId>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentPhase {
    /// All traffic on the current revision of record
    Stable,
    /// A shift plan is in progress
    Shifting,
    /// The last shift was aborted and traffic restored to blue
    RolledBack,
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentPhase::Stable => write!(f, "Stable"),
            DeploymentPhase::Shifting => write!(f, "Shifting"),
            DeploymentPhase::RolledBack => write!(f, "RolledBack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percentages(plan: &ShiftPlan) -> Vec<u8> {
        plan.steps().iter().map(|s| s.percentage).collect()
    }

    #[test]
    fn test_split_always_sums_to_hundred() {
        for green in [0u8, 25, 50, 100, 200] {
            let split = TrafficSplit::with_green(green);
            assert_eq!(split.blue() as u16 + split.green() as u16, 100);
        }
        assert_eq!(TrafficSplit::default(), TrafficSplit::all_blue());
    }

    #[test]
    fn test_parse_explicit_steps() {
        let plan = ShiftPlan::parse("25:30s, 50:500ms, 100:0").unwrap();
        assert_eq!(percentages(&plan), vec![25, 50, 100]);
        assert_eq!(plan.steps()[0].hold(), Duration::from_secs(30));
        assert_eq!(plan.steps()[1].hold(), Duration::from_millis(500));
        assert_eq!(plan.steps()[2].hold(), Duration::ZERO);
    }

    #[test]
    fn test_parse_linear_policy() {
        let plan = ShiftPlan::parse("linear:10:1m").unwrap();
        assert_eq!(plan.steps().len(), 10);
        assert_eq!(plan.steps()[0].percentage, 10);
        assert_eq!(plan.steps()[9].percentage, 100);
        assert!(plan.steps().iter().all(|s| s.hold() == Duration::from_secs(60)));

        let uneven = ShiftPlan::linear(30, Duration::ZERO).unwrap();
        assert_eq!(percentages(&uneven), vec![30, 60, 90, 100]);
    }

    #[test]
    fn test_rejects_invalid_plans() {
        assert_eq!(ShiftPlan::new(vec![]), Err(ShiftPlanError::Empty));
        assert_eq!(
            ShiftPlan::parse("50:1s,25:1s,100:1s"),
            Err(ShiftPlanError::NotIncreasing(25))
        );
        assert_eq!(
            ShiftPlan::parse("25:1s,50:1s"),
            Err(ShiftPlanError::Incomplete(50))
        );
        assert_eq!(ShiftPlan::parse("0:1s,100:1s"), Err(ShiftPlanError::OutOfRange(0)));
        assert!(matches!(
            ShiftPlan::parse("25-1s"),
            Err(ShiftPlanError::Malformed(_))
        ));
        assert!(matches!(
            ShiftPlan::parse("linear:abc:1s"),
            Err(ShiftPlanError::Malformed(_))
        ));
    }

    #[test]
    fn test_health_degradation() {
        let threshold = HealthThreshold {
            max_error_rate: 0.01,
            max_latency_ms: 200,
        };
        assert!(HealthSignal::healthy().degradation(&threshold).is_none());

        let errors = HealthSignal {
            error_rate: 0.2,
            latency_ms: 10,
        };
        assert!(errors.degradation(&threshold).unwrap().contains("error rate"));

        let slow = HealthSignal {
            error_rate: 0.0,
            latency_ms: 900,
        };
        assert!(slow.degradation(&threshold).unwrap().contains("latency"));
    }
}
