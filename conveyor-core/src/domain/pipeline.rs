//! Pipeline domain types
//!
//! A pipeline is a strictly linear list of stages. Each stage holds actions
//! grouped by `run_order`: actions sharing a run order run concurrently,
//! groups run in ascending order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

/// Stored pipeline
///
/// Structure shared between orchestrator (persists and executes) and client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub stages: Vec<Stage>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Pipeline {
    /// Definition part of the pipeline (what gets validated and stored)
    pub fn definition(&self) -> PipelineDefinition {
        PipelineDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            stages: self.stages.clone(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// Pipeline definition as authored by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub stages: Vec<Stage>,
}

impl PipelineDefinition {
    /// Start building a definition
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            description: None,
            stages: Vec::new(),
        }
    }

    /// Check structural invariants of the definition.
    ///
    /// A valid definition:
    /// - has at least one stage, with unique stage names
    /// - starts with a stage made only of `Source` actions, and no later stage has one
    /// - has unique action names within each stage and run orders >= 1
    /// - produces every artifact name at most once
    /// - only consumes artifacts produced by an earlier stage or an earlier
    ///   run-order group of the same stage
    /// - places a `BlueGreenDeploy` action alone in the last group of the last stage
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if self.stages.is_empty() {
            return Err(DefinitionError::NoStages);
        }

        let mut stage_names = HashSet::new();
        let mut produced: HashSet<&str> = HashSet::new();
        let last_stage = self.stages.len() - 1;

        for (index, stage) in self.stages.iter().enumerate() {
            if !stage_names.insert(stage.name.as_str()) {
                return Err(DefinitionError::DuplicateStage(stage.name.clone()));
            }
            if stage.actions.is_empty() {
                return Err(DefinitionError::EmptyStage(stage.name.clone()));
            }

            let mut action_names = HashSet::new();
            for action in &stage.actions {
                if !action_names.insert(action.name.as_str()) {
                    return Err(DefinitionError::DuplicateAction {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                    });
                }
                if action.run_order == 0 {
                    return Err(DefinitionError::InvalidRunOrder {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                    });
                }
                let is_source = action.kind == ActionKind::Source;
                if (index == 0) != is_source {
                    return Err(DefinitionError::MisplacedSource {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                    });
                }
            }

            let groups = stage.groups();
            let last_order = groups.keys().next_back().copied();
            for (order, actions) in &groups {
                // Outputs of this group only become visible to later groups
                let mut group_outputs = Vec::new();
                for action in actions {
                    for input in &action.inputs {
                        if !produced.contains(input.as_str()) {
                            return Err(DefinitionError::UnknownInput {
                                stage: stage.name.clone(),
                                action: action.name.clone(),
                                input: input.clone(),
                            });
                        }
                    }
                    for output in &action.outputs {
                        if produced.contains(output.as_str()) || group_outputs.contains(&output.as_str())
                        {
                            return Err(DefinitionError::DuplicateOutput(output.clone()));
                        }
                        group_outputs.push(output.as_str());
                    }
                    if action.kind == ActionKind::BlueGreenDeploy
                        && (index != last_stage || Some(*order) != last_order || actions.len() != 1)
                    {
                        return Err(DefinitionError::BlueGreenNotTerminal {
                            stage: stage.name.clone(),
                            action: action.name.clone(),
                        });
                    }
                }
                produced.extend(group_outputs);
            }
        }

        Ok(())
    }
}

/// Builder for pipeline definitions
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    description: Option<String>,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Validate and produce the definition
    pub fn build(self) -> Result<PipelineDefinition, DefinitionError> {
        let definition = PipelineDefinition {
            name: self.name,
            description: self.description,
            stages: self.stages,
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// A named step of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Actions partitioned by run order, ascending
    pub fn groups(&self) -> BTreeMap<u32, Vec<&Action>> {
        let mut groups: BTreeMap<u32, Vec<&Action>> = BTreeMap::new();
        for action in &self.actions {
            groups.entry(action.run_order).or_default().push(action);
        }
        groups
    }

    /// Names of all artifacts produced by this stage
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.actions
            .iter()
            .flat_map(|a| a.outputs.iter().map(String::as_str))
    }
}

/// Single unit of work with declared inputs and outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    #[serde(default = "default_run_order")]
    pub run_order: u32,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Opaque options consumed by the executor bound to `kind`
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

fn default_run_order() -> u32 {
    1
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            run_order: default_run_order(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            configuration: HashMap::new(),
        }
    }

    pub fn run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    pub fn input(mut self, artifact: impl Into<String>) -> Self {
        self.inputs.push(artifact.into());
        self
    }

    pub fn output(mut self, artifact: impl Into<String>) -> Self {
        self.outputs.push(artifact.into());
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).map(String::as_str)
    }
}

/// Kind of work an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Source,
    Build,
    Test,
    ImagePublish,
    Approval,
    Deploy,
    BlueGreenDeploy,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Source => "Source",
            ActionKind::Build => "Build",
            ActionKind::Test => "Test",
            ActionKind::ImagePublish => "ImagePublish",
            ActionKind::Approval => "Approval",
            ActionKind::Deploy => "Deploy",
            ActionKind::BlueGreenDeploy => "BlueGreenDeploy",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a pipeline definition is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("pipeline name cannot be empty")]
    EmptyName,

    #[error("pipeline must contain at least one stage")]
    NoStages,

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("stage '{0}' has no actions")]
    EmptyStage(String),

    #[error("action '{action}' is declared more than once in stage '{stage}'")]
    DuplicateAction { stage: String, action: String },

    #[error("action '{action}' in stage '{stage}' must have a run order >= 1")]
    InvalidRunOrder { stage: String, action: String },

    #[error(
        "action '{action}' in stage '{stage}': the first stage must contain only Source actions and no other stage may contain one"
    )]
    MisplacedSource { stage: String, action: String },

    #[error("artifact '{0}' is produced more than once")]
    DuplicateOutput(String),

    #[error("action '{action}' in stage '{stage}' consumes '{input}', which no earlier action produces")]
    UnknownInput {
        stage: String,
        action: String,
        input: String,
    },

    #[error(
        "blue/green action '{action}' in stage '{stage}' must be the only action of the last group of the final stage"
    )]
    BlueGreenNotTerminal { stage: String, action: String },
}
