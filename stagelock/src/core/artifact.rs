//! Artifact references and records.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::Timestamp;
use crate::identity::StageId;

/// Opaque handle to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Wraps an existing reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Reference of the reusable artifact for `(run, stage, stage_id)`.
    #[must_use]
    pub fn reusable(run_id: Uuid, stage: &str, stage_id: &StageId) -> Self {
        Self(format!("{run_id}/{stage}/{stage_id}"))
    }

    /// A unique reference for a non-reusable (partial) artifact.
    #[must_use]
    pub fn partial(run_id: Uuid, stage: &str, stage_id: &StageId) -> Self {
        Self(format!(
            "{run_id}/{stage}/{stage_id}.partial.{}",
            Uuid::new_v4().simple()
        ))
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An artifact about to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDraft {
    /// The owning run.
    pub run_id: Uuid,
    /// The producing stage.
    pub stage: String,
    /// Identity of the inputs.
    pub stage_id: StageId,
    /// Full digest of the inputs.
    pub input_digest: String,
    /// Whether a later lock with the same identity may reuse it.
    pub reusable: bool,
    /// Executor output.
    pub payload: serde_json::Value,
}

impl ArtifactDraft {
    /// Returns the reference this draft will be stored under.
    #[must_use]
    pub fn artifact_ref(&self) -> ArtifactRef {
        if self.reusable {
            ArtifactRef::reusable(self.run_id, &self.stage, &self.stage_id)
        } else {
            ArtifactRef::partial(self.run_id, &self.stage, &self.stage_id)
        }
    }
}

/// A stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Where the artifact lives.
    pub artifact_ref: ArtifactRef,
    /// The owning run.
    pub run_id: Uuid,
    /// The producing stage.
    pub stage: String,
    /// Identity of the inputs.
    pub stage_id: StageId,
    /// Full digest of the inputs, echoed for collision checks.
    pub input_digest: String,
    /// Whether a later lock with the same identity may reuse it.
    pub reusable: bool,
    /// Executor output.
    pub payload: serde_json::Value,
    /// When it was stored.
    pub created_at: Timestamp,
}

impl ArtifactRecord {
    /// Creates the stored record for a draft.
    #[must_use]
    pub fn from_draft(artifact_ref: ArtifactRef, draft: ArtifactDraft) -> Self {
        Self {
            artifact_ref,
            run_id: draft.run_id,
            stage: draft.stage,
            stage_id: draft.stage_id,
            input_digest: draft.input_digest,
            reusable: draft.reusable,
            payload: draft.payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reusable_ref_is_stable() {
        let run_id = Uuid::nil();
        let id = StageId::new("0011223344556677");

        assert_eq!(
            ArtifactRef::reusable(run_id, "select", &id),
            ArtifactRef::reusable(run_id, "select", &id)
        );
        assert_eq!(
            ArtifactRef::reusable(run_id, "select", &id).as_str(),
            "00000000-0000-0000-0000-000000000000/select/0011223344556677"
        );
    }

    #[test]
    fn test_partial_refs_are_unique() {
        let run_id = Uuid::nil();
        let id = StageId::new("0011223344556677");

        let first = ArtifactRef::partial(run_id, "transform", &id);
        let second = ArtifactRef::partial(run_id, "transform", &id);

        assert_ne!(first, second);
        assert!(first.as_str().contains(".partial."));
    }
}
