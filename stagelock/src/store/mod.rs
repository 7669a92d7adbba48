//! Durable run state.
//!
//! A [`RunStateStore`] owns the [`Run`] records. Every mutation goes through
//! [`RunStateStore::commit`], which applies a [`RunUpdate`] all-or-nothing:
//! records are validated first, and a failed write leaves the previous state
//! in place.

mod atomic;
mod file;
mod memory;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::core::{Run, StageStatus};
use crate::errors::{EngineError, NotFoundError, PersistenceError};
use crate::graph::StageGraphConfig;

pub(crate) use atomic::write_atomic;
pub use file::FileRunStore;
pub use memory::InMemoryRunStore;

/// Errors returned by run state stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The run or stage does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The write failed; nothing was committed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(e) => Self::NotFound(e),
            StoreError::Persistence(e) => Self::Persistence(e),
        }
    }
}

/// A batch of stage records and an optional new current-stage pointer,
/// committed as one unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunUpdate {
    /// Stage records to write.
    pub stages: Vec<(String, StageStatus)>,
    /// New current-stage pointer, if it moves.
    pub current_stage: Option<String>,
}

impl RunUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An update writing a single stage.
    #[must_use]
    pub fn single(stage: impl Into<String>, status: StageStatus) -> Self {
        Self::new().with_stage(stage, status)
    }

    /// Adds a stage record.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>, status: StageStatus) -> Self {
        self.stages.push((stage.into(), status));
        self
    }

    /// Moves the current-stage pointer.
    #[must_use]
    pub fn with_current(mut self, stage: impl Into<String>) -> Self {
        self.current_stage = Some(stage.into());
        self
    }

    /// Returns true if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty() && self.current_stage.is_none()
    }
}

/// Storage backend for run records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Creates and persists a fresh run for the graph.
    async fn create_run(&self, graph: &StageGraphConfig) -> Result<Run, StoreError>;

    /// Reads a run.
    async fn get_run(&self, run_id: Uuid) -> Result<Run, StoreError>;

    /// Reads one stage record.
    async fn read_stage(&self, run_id: Uuid, stage: &str) -> Result<StageStatus, StoreError> {
        let run = self.get_run(run_id).await?;
        run.stages
            .get(stage)
            .cloned()
            .ok_or_else(|| NotFoundError::Stage(stage.to_string()).into())
    }

    /// Writes one stage record.
    async fn write_stage(
        &self,
        run_id: Uuid,
        stage: &str,
        status: StageStatus,
    ) -> Result<(), StoreError> {
        self.commit(run_id, RunUpdate::single(stage, status))
            .await
            .map(|_| ())
    }

    /// Applies an update atomically and returns the new run.
    async fn commit(&self, run_id: Uuid, update: RunUpdate) -> Result<Run, StoreError>;

    /// Lists known run ids.
    async fn list_runs(&self) -> Result<Vec<Uuid>, StoreError>;
}

/// Validates `update` against `run` and returns the updated copy.
///
/// Nothing is applied unless every record is valid and names a stage of the
/// run.
pub(crate) fn apply_update(run: &Run, update: &RunUpdate) -> Result<Run, StoreError> {
    for (stage, status) in &update.stages {
        if !run.stages.contains_key(stage) {
            return Err(NotFoundError::Stage(stage.clone()).into());
        }
        status.validate(stage)?;
    }
    if let Some(current) = &update.current_stage {
        if !run.stages.contains_key(current) {
            return Err(NotFoundError::Stage(current.clone()).into());
        }
    }

    let mut next = run.clone();
    for (stage, status) in &update.stages {
        next.stages.insert(stage.clone(), status.clone());
    }
    if let Some(current) = &update.current_stage {
        next.current_stage = Some(current.clone());
    }
    next.updated_at = Utc::now();
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactRef, LockState};
    use crate::identity::StageId;

    fn run() -> Run {
        Run::new(&StageGraphConfig::default_pipeline().unwrap())
    }

    #[test]
    fn test_apply_update_writes_all_records() {
        let run = run();
        let update = RunUpdate::new()
            .with_stage(
                "discover",
                StageStatus::completed(StageId::new("aaaaaaaaaaaaaaaa"), ArtifactRef::new("a")),
            )
            .with_stage("select", StageStatus::incomplete(StageId::new("bbbbbbbbbbbbbbbb"), None, None))
            .with_current("select");

        let next = apply_update(&run, &update).unwrap();

        assert_eq!(next.stages["discover"].state, LockState::Locked);
        assert_eq!(next.stages["select"].state, LockState::Locked);
        assert_eq!(next.current_stage.as_deref(), Some("select"));
        assert!(next.updated_at >= run.updated_at);
    }

    #[test]
    fn test_apply_update_rejects_whole_batch_on_invalid_record() {
        let run = run();
        let mut broken = StageStatus::unlocked();
        broken.completed = true;

        let update = RunUpdate::new()
            .with_stage("discover", StageStatus::incomplete(StageId::new("aaaaaaaaaaaaaaaa"), None, None))
            .with_stage("select", broken);

        assert!(matches!(
            apply_update(&run, &update),
            Err(StoreError::Persistence(PersistenceError::InvalidRecord { .. }))
        ));
    }

    #[test]
    fn test_apply_update_rejects_unknown_stage() {
        let update = RunUpdate::single("report", StageStatus::unlocked());
        assert!(matches!(
            apply_update(&run(), &update),
            Err(StoreError::NotFound(NotFoundError::Stage(_)))
        ));
    }

    #[test]
    fn test_store_error_converts_to_engine_error() {
        let err: EngineError = StoreError::NotFound(NotFoundError::Run(Uuid::nil())).into();
        assert_eq!(err.code(), "RUN-404");
    }
}
