//! In-memory run state store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{apply_update, RunStateStore, RunUpdate, StoreError};
use crate::core::Run;
use crate::errors::NotFoundError;
use crate::graph::StageGraphConfig;

/// Run store backed by a process-local map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<Uuid, Run>>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    /// Returns true if the store holds no runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[async_trait]
impl RunStateStore for InMemoryRunStore {
    async fn create_run(&self, graph: &StageGraphConfig) -> Result<Run, StoreError> {
        let run = Run::new(graph);
        self.runs.write().insert(run.run_id, run.clone());
        debug!(run_id = %run.run_id, "Created run");
        Ok(run)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Run, StoreError> {
        self.runs
            .read()
            .get(&run_id)
            .cloned()
            .ok_or_else(|| NotFoundError::Run(run_id).into())
    }

    async fn commit(&self, run_id: Uuid, update: RunUpdate) -> Result<Run, StoreError> {
        let mut runs = self.runs.write();
        let current = runs.get(&run_id).ok_or(NotFoundError::Run(run_id))?;
        let next = apply_update(current, &update)?;
        runs.insert(run_id, next.clone());
        debug!(run_id = %run_id, records = update.stages.len(), "Committed run update");
        Ok(next)
    }

    async fn list_runs(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids: Vec<Uuid> = self.runs.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactRef, LockState, StageStatus};
    use crate::identity::StageId;
    use pretty_assertions::assert_eq;

    fn graph() -> StageGraphConfig {
        StageGraphConfig::default_pipeline().unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let store = InMemoryRunStore::new();
        let run = store.create_run(&graph()).await.unwrap();

        assert_eq!(store.get_run(run.run_id).await.unwrap(), run);
        assert_eq!(store.list_runs().await.unwrap(), vec![run.run_id]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_run() {
        let store = InMemoryRunStore::new();
        let err = store.get_run(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(NotFoundError::Run(_))));
    }

    #[tokio::test]
    async fn test_write_and_read_stage() {
        let store = InMemoryRunStore::new();
        let run = store.create_run(&graph()).await.unwrap();
        let status = StageStatus::completed(StageId::new("0123456789abcdef"), ArtifactRef::new("a"));

        store
            .write_stage(run.run_id, "discover", status.clone())
            .await
            .unwrap();

        let read = store.read_stage(run.run_id, "discover").await.unwrap();
        assert_eq!(read, status);
        assert_eq!(read.state, LockState::Locked);
    }

    #[tokio::test]
    async fn test_rejected_commit_leaves_state_unchanged() {
        let store = InMemoryRunStore::new();
        let run = store.create_run(&graph()).await.unwrap();

        let mut invalid = StageStatus::unlocked();
        invalid.completed = true;
        let update = RunUpdate::new()
            .with_stage(
                "discover",
                StageStatus::completed(StageId::new("0123456789abcdef"), ArtifactRef::new("a")),
            )
            .with_stage("select", invalid);

        assert!(store.commit(run.run_id, update).await.is_err());
        assert_eq!(store.get_run(run.run_id).await.unwrap(), run);
    }
}
