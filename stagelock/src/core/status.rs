//! Stage status, lock state and checkpoints.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ArtifactRef, Timestamp};
use crate::errors::PersistenceError;
use crate::graph::Requirement;
use crate::identity::StageId;

/// Whether a stage is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Pending (re-)execution.
    #[default]
    Unlocked,
    /// Executed, or attempted, and frozen.
    Locked,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// The three observable states of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    /// Not locked.
    Unlocked,
    /// Locked after a cancelled or partial execution.
    LockedIncomplete,
    /// Locked with a reusable, completed artifact.
    LockedCompleted,
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::LockedIncomplete => write!(f, "locked but incomplete"),
            Self::LockedCompleted => write!(f, "locked and completed"),
        }
    }
}

/// Progress report of a long-running execution.
///
/// Describes how far the work got, never its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The operation that recorded the checkpoint.
    pub operation_id: String,
    /// Items processed so far.
    pub completed_items: u64,
    /// Total items, if known.
    pub total_items: Option<u64>,
    /// Whether a later execution may resume from here.
    pub resumable: bool,
    /// Free-form position marker owned by the executor.
    #[serde(default)]
    pub marker: serde_json::Value,
    /// When the checkpoint was recorded.
    pub recorded_at: Timestamp,
}

impl Checkpoint {
    /// Creates a resumable checkpoint with no marker.
    #[must_use]
    pub fn new(operation_id: impl Into<String>, completed_items: u64, total_items: Option<u64>) -> Self {
        Self {
            operation_id: operation_id.into(),
            completed_items,
            total_items,
            resumable: true,
            marker: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }

    /// Sets the position marker.
    #[must_use]
    pub fn with_marker(mut self, marker: serde_json::Value) -> Self {
        self.marker = marker;
        self
    }

    /// Marks the checkpoint as not resumable.
    #[must_use]
    pub fn non_resumable(mut self) -> Self {
        self.resumable = false;
        self
    }

    /// Returns the completed fraction, if the total is known and non-zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> Option<f64> {
        match self.total_items {
            Some(total) if total > 0 => Some(self.completed_items as f64 / total as f64),
            _ => None,
        }
    }
}

/// Persisted status of one stage within a run.
///
/// `completed = true` implies `state = Locked` with both `stage_id` and
/// `artifact_ref` set. Stores reject records that break this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageStatus {
    /// Lock state.
    pub state: LockState,
    /// Identity of the last lock attempt.
    pub stage_id: Option<StageId>,
    /// Whether the last execution completed.
    pub completed: bool,
    /// When the stage was last locked.
    pub locked_at: Option<Timestamp>,
    /// When the stage was last unlocked.
    #[serde(default)]
    pub unlocked_at: Option<Timestamp>,
    /// Artifact of the last execution.
    pub artifact_ref: Option<ArtifactRef>,
    /// Last checkpoint of a cancelled or partial execution.
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
}

impl StageStatus {
    /// A fresh, never-locked stage.
    #[must_use]
    pub fn unlocked() -> Self {
        Self::default()
    }

    /// A stage locked with a completed artifact.
    #[must_use]
    pub fn completed(stage_id: StageId, artifact_ref: ArtifactRef) -> Self {
        Self {
            state: LockState::Locked,
            stage_id: Some(stage_id),
            completed: true,
            locked_at: Some(Utc::now()),
            unlocked_at: None,
            artifact_ref: Some(artifact_ref),
            checkpoint: None,
        }
    }

    /// A stage locked after a cancelled or partial execution.
    #[must_use]
    pub fn incomplete(
        stage_id: StageId,
        artifact_ref: Option<ArtifactRef>,
        checkpoint: Option<Checkpoint>,
    ) -> Self {
        Self {
            state: LockState::Locked,
            stage_id: Some(stage_id),
            completed: false,
            locked_at: Some(Utc::now()),
            unlocked_at: None,
            artifact_ref,
            checkpoint,
        }
    }

    /// Returns true if the stage is locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }

    /// Returns the observable phase.
    #[must_use]
    pub fn phase(&self) -> StagePhase {
        match (self.state, self.completed) {
            (LockState::Unlocked, _) => StagePhase::Unlocked,
            (LockState::Locked, false) => StagePhase::LockedIncomplete,
            (LockState::Locked, true) => StagePhase::LockedCompleted,
        }
    }

    /// Returns true if the status satisfies a gate requirement.
    #[must_use]
    pub fn satisfies(&self, requirement: Requirement) -> bool {
        match requirement {
            Requirement::Locked => self.is_locked(),
            Requirement::Completed => self.phase() == StagePhase::LockedCompleted,
        }
    }

    /// Returns the unlocked form of this status.
    ///
    /// The stage id, artifact reference and checkpoint are kept; only the
    /// lock and completion flags change.
    #[must_use]
    pub fn into_unlocked(self) -> Self {
        Self {
            state: LockState::Unlocked,
            completed: false,
            unlocked_at: Some(Utc::now()),
            ..self
        }
    }

    /// Checks the status invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidRecord`] naming the broken invariant.
    pub fn validate(&self, stage: &str) -> Result<(), PersistenceError> {
        if !self.completed {
            return Ok(());
        }

        let reason = if self.state != LockState::Locked {
            "completed stage must be locked"
        } else if self.stage_id.is_none() {
            "completed stage must carry a stage id"
        } else if self.artifact_ref.is_none() {
            "completed stage must carry an artifact reference"
        } else {
            return Ok(());
        };

        Err(PersistenceError::InvalidRecord {
            stage: stage.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Returns the checkpoint a re-lock with `stage_id` may resume from.
    #[must_use]
    pub fn resumable_checkpoint_for(&self, stage_id: &StageId) -> Option<&Checkpoint> {
        if self.phase() != StagePhase::LockedIncomplete || self.stage_id.as_ref() != Some(stage_id) {
            return None;
        }
        self.checkpoint.as_ref().filter(|cp| cp.resumable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id() -> StageId {
        StageId::new("00112233aabbccdd")
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(StagePhase::Unlocked.to_string(), "unlocked");
        assert_eq!(StagePhase::LockedIncomplete.to_string(), "locked but incomplete");
        assert_eq!(LockState::Locked.to_string(), "locked");
    }

    #[test]
    fn test_phases_and_requirements() {
        let fresh = StageStatus::unlocked();
        let partial = StageStatus::incomplete(id(), None, None);
        let done = StageStatus::completed(id(), ArtifactRef::new("r/s/id"));

        assert_eq!(fresh.phase(), StagePhase::Unlocked);
        assert_eq!(partial.phase(), StagePhase::LockedIncomplete);
        assert_eq!(done.phase(), StagePhase::LockedCompleted);

        assert!(!fresh.satisfies(Requirement::Locked));
        assert!(partial.satisfies(Requirement::Locked));
        assert!(!partial.satisfies(Requirement::Completed));
        assert!(done.satisfies(Requirement::Completed));
    }

    #[test]
    fn test_into_unlocked_keeps_identity() {
        let done = StageStatus::completed(id(), ArtifactRef::new("r/s/id"));
        let unlocked = done.clone().into_unlocked();

        assert_eq!(unlocked.state, LockState::Unlocked);
        assert!(!unlocked.completed);
        assert_eq!(unlocked.stage_id, done.stage_id);
        assert_eq!(unlocked.artifact_ref, done.artifact_ref);
        assert!(unlocked.unlocked_at.is_some());
        assert!(unlocked.validate("s").is_ok());
    }

    #[test]
    fn test_validate_rejects_completed_without_artifact() {
        let mut status = StageStatus::completed(id(), ArtifactRef::new("r/s/id"));
        status.artifact_ref = None;
        assert!(matches!(
            status.validate("export"),
            Err(PersistenceError::InvalidRecord { .. })
        ));

        let mut unlocked_done = StageStatus::unlocked();
        unlocked_done.completed = true;
        assert!(unlocked_done.validate("export").is_err());
    }

    #[test]
    fn test_resumable_checkpoint_requires_same_id() {
        let cp = Checkpoint::new("run:transform", 3, Some(10));
        let status = StageStatus::incomplete(id(), None, Some(cp.clone()));

        assert_eq!(status.resumable_checkpoint_for(&id()), Some(&cp));
        assert_eq!(
            status.resumable_checkpoint_for(&StageId::new("ffffffffffffffff")),
            None
        );

        let blocked = StageStatus::incomplete(id(), None, Some(cp.non_resumable()));
        assert_eq!(blocked.resumable_checkpoint_for(&id()), None);
    }

    #[test]
    fn test_checkpoint_progress() {
        assert_eq!(Checkpoint::new("op", 5, Some(10)).progress(), Some(0.5));
        assert_eq!(Checkpoint::new("op", 5, None).progress(), None);
        assert_eq!(Checkpoint::new("op", 0, Some(0)).progress(), None);
    }
}
