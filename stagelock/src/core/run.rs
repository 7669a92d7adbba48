//! The run record.

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{StagePhase, StageStatus, Timestamp};
use crate::graph::StageGraphConfig;

/// One processing session.
///
/// `stages` holds exactly one status per stage of the graph the run was
/// created from, in pipeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// When the run was created.
    pub created_at: Timestamp,
    /// When the run was last modified.
    pub updated_at: Timestamp,
    /// The stage most recently locked or explicitly unlocked.
    pub current_stage: Option<String>,
    /// Per-stage status in pipeline order.
    pub stages: IndexMap<String, StageStatus>,
}

impl Run {
    /// Creates a fresh run with every stage unlocked.
    #[must_use]
    pub fn new(graph: &StageGraphConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            current_stage: None,
            stages: graph
                .stages()
                .into_iter()
                .map(|name| (name.to_string(), StageStatus::unlocked()))
                .collect(),
        }
    }

    /// Returns the status of a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageStatus> {
        self.stages.get(name)
    }

    /// Returns the phase of a stage.
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<StagePhase> {
        self.stages.get(name).map(StageStatus::phase)
    }

    /// Returns the names of stages locked with a completed artifact.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|(_, status)| status.phase() == StagePhase::LockedCompleted)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
