//! Execution domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::artifact::ArtifactSet;
use crate::domain::pipeline::Pipeline;

/// Monotonically increasing execution identifier
pub type ExecutionId = i64;

/// One run of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    /// Source revision that triggered this run
    pub revision: String,
    pub status: ExecutionStatus,
    pub stages: Vec<StageState>,
    /// Artifact set handed to the next stage
    pub artifacts: ArtifactSet,
    pub failing_stage: Option<String>,
    pub failing_action: Option<String>,
    pub error: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Execution {
    /// Fresh execution record for `pipeline`, every stage pending
    pub fn start(id: ExecutionId, pipeline: &Pipeline, trigger: &Trigger) -> Self {
        Self {
            id,
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            revision: trigger.revision.clone(),
            status: ExecutionStatus::Running,
            stages: pipeline
                .stages
                .iter()
                .map(|s| StageState::pending(&s.name))
                .collect(),
            artifacts: ArtifactSet::new(),
            failing_stage: None,
            failing_action: None,
            error: None,
            started_at: chrono::Utc::now(),
            completed_at: None,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageState> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_mut(&mut self, name: &str) -> Option<&mut StageState> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// First stage that has not succeeded yet
    pub fn next_stage(&self) -> Option<&StageState> {
        self.stages
            .iter()
            .find(|s| s.status != StageStatus::Succeeded)
    }
}

/// Execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "Running"),
            ExecutionStatus::Succeeded => write!(f, "Succeeded"),
            ExecutionStatus::Failed => write!(f, "Failed"),
            ExecutionStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Per-stage progress within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub name: String,
    pub status: StageStatus,
    pub failing_action: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl StageState {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            failing_action: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "Pending"),
            StageStatus::Running => write!(f, "Running"),
            StageStatus::Succeeded => write!(f, "Succeeded"),
            StageStatus::Failed => write!(f, "Failed"),
            StageStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// External event that starts an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub revision: String,
}

impl Trigger {
    pub fn revision(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{Action, ActionKind, Stage};

    fn pipeline() -> Pipeline {
        Pipeline {
            id: Uuid::new_v4(),
            name: "workshop".to_string(),
            description: None,
            stages: vec![
                Stage::new("Source").action(Action::new("s", ActionKind::Source)),
                Stage::new("Build").action(Action::new("b", ActionKind::Build)),
            ],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_start_marks_all_stages_pending() {
        let execution = Execution::start(3, &pipeline(), &Trigger::revision("abc123"));

        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.revision, "abc123");
        assert!(
            execution
                .stages
                .iter()
                .all(|s| s.status == StageStatus::Pending)
        );
        assert_eq!(execution.next_stage().unwrap().name, "Source");
    }

    #[test]
    fn test_next_stage_skips_succeeded() {
        let mut execution = Execution::start(1, &pipeline(), &Trigger::revision("r"));
        execution.stage_mut("Source").unwrap().status = StageStatus::Succeeded;
        assert_eq!(execution.next_stage().unwrap().name, "Build");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Stopped.is_terminal());
    }
}
