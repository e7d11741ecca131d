//! Artifact domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::execution::ExecutionId;

/// Read-only reference to an artifact held by the artifact store
///
/// Identity is `(pipeline_id, name, execution_id)`; `digest` is the
/// SHA-256 of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub pipeline_id: Uuid,
    pub name: String,
    pub execution_id: ExecutionId,
    pub digest: String,
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = self.digest.get(..12).unwrap_or(&self.digest);
        write!(f, "{}@{}#{}", self.name, self.execution_id, short)
    }
}

/// Artifacts visible to a stage, keyed by artifact name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSet {
    refs: BTreeMap<String, ArtifactRef>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference, replacing any older one with the same name
    pub fn insert(&mut self, artifact: ArtifactRef) {
        self.refs.insert(artifact.name.clone(), artifact);
    }

    pub fn extend(&mut self, artifacts: impl IntoIterator<Item = ArtifactRef>) {
        for artifact in artifacts {
            self.insert(artifact);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArtifactRef> {
        self.refs.get(name)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.refs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.refs.keys().map(String::as_str)
    }
}

impl FromIterator<ArtifactRef> for ArtifactSet {
    fn from_iter<T: IntoIterator<Item = ArtifactRef>>(iter: T) -> Self {
        let mut set = ArtifactSet::new();
        set.extend(iter);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, execution_id: ExecutionId) -> ArtifactRef {
        ArtifactRef {
            pipeline_id: Uuid::nil(),
            name: name.to_string(),
            execution_id,
            digest: "0123456789abcdef".to_string(),
        }
    }

    #[test]
    fn test_insert_replaces_by_name() {
        let mut set = ArtifactSet::new();
        set.insert(artifact("S1", 1));
        set.insert(artifact("S2", 1));
        set.insert(artifact("S1", 2));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("S1").unwrap().execution_id, 2);
    }

    #[test]
    fn test_display_uses_short_digest() {
        assert_eq!(artifact("S1", 7).to_string(), "S1@7#0123456789ab");
    }

    #[test]
    fn test_serializes_as_map() {
        let set: ArtifactSet = vec![artifact("S1", 1)].into_iter().collect();
        let json = serde_json::to_value(&set).unwrap();
        assert!(json.get("S1").is_some());
        let back: ArtifactSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }
}
