//! File-backed run state store.
//!
//! Layout: `<root>/runs/<run_id>.json`, one pretty-printed JSON document per
//! run, always replaced through an atomic rename.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{apply_update, write_atomic, RunStateStore, RunUpdate, StoreError};
use crate::core::Run;
use crate::errors::{NotFoundError, PersistenceError};
use crate::graph::StageGraphConfig;

/// Run store persisting each run as a JSON file.
#[derive(Debug)]
pub struct FileRunStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileRunStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        let runs = root.join("runs");
        fs::create_dir_all(&runs).map_err(|e| PersistenceError::io(&runs, e))?;
        debug!(root = %root.display(), "Opened file run store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.json"))
    }

    fn load(&self, run_id: Uuid) -> Result<Run, StoreError> {
        let path = self.run_path(run_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(NotFoundError::Run(run_id).into())
            }
            Err(e) => return Err(PersistenceError::io(&path, e).into()),
        };
        let run: Run = serde_json::from_slice(&bytes).map_err(PersistenceError::from)?;
        Ok(run)
    }

    fn save(&self, run: &Run) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(run).map_err(PersistenceError::from)?;
        write_atomic(&self.run_path(run.run_id), &bytes)?;
        Ok(())
    }
}

#[async_trait]
impl RunStateStore for FileRunStore {
    async fn create_run(&self, graph: &StageGraphConfig) -> Result<Run, StoreError> {
        let run = Run::new(graph);
        let _guard = self.write_lock.lock();
        self.save(&run)?;
        debug!(run_id = %run.run_id, "Created run");
        Ok(run)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Run, StoreError> {
        self.load(run_id)
    }

    async fn commit(&self, run_id: Uuid, update: RunUpdate) -> Result<Run, StoreError> {
        let _guard = self.write_lock.lock();
        let current = self.load(run_id)?;
        let next = apply_update(&current, &update)?;
        if let Err(e) = self.save(&next) {
            warn!(run_id = %run_id, error = %e, "Run update not persisted");
            return Err(e);
        }
        debug!(run_id = %run_id, records = update.stages.len(), "Committed run update");
        Ok(next)
    }

    async fn list_runs(&self) -> Result<Vec<Uuid>, StoreError> {
        let dir = self.root.join("runs");
        let entries = fs::read_dir(&dir).map_err(|e| PersistenceError::io(&dir, e))?;

        let mut ids: Vec<Uuid> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| Uuid::parse_str(stem).ok())
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactRef, StageStatus};
    use crate::identity::StageId;
    use pretty_assertions::assert_eq;

    fn graph() -> StageGraphConfig {
        StageGraphConfig::default_pipeline().unwrap()
    }

    #[tokio::test]
    async fn test_run_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = {
            let store = FileRunStore::open(dir.path()).unwrap();
            let run = store.create_run(&graph()).await.unwrap();
            store
                .commit(
                    run.run_id,
                    RunUpdate::single(
                        "discover",
                        StageStatus::completed(StageId::new("0123456789abcdef"), ArtifactRef::new("a")),
                    )
                    .with_current("discover"),
                )
                .await
                .unwrap();
            run.run_id
        };

        let reopened = FileRunStore::open(dir.path()).unwrap();
        let run = reopened.get_run(run_id).await.unwrap();

        assert!(run.stages["discover"].completed);
        assert_eq!(run.current_stage.as_deref(), Some("discover"));
        assert_eq!(reopened.list_runs().await.unwrap(), vec![run_id]);
    }

    #[tokio::test]
    async fn test_missing_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).unwrap();

        let err = store.get_run(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(NotFoundError::Run(_))));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).unwrap();
        let run_id = Uuid::new_v4();
        fs::write(store.run_path(run_id), b"{not json").unwrap();

        let err = store.get_run(run_id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Persistence(PersistenceError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_commit_keeps_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).unwrap();
        let run = store.create_run(&graph()).await.unwrap();
        let before = fs::read(store.run_path(run.run_id)).unwrap();

        let mut invalid = StageStatus::unlocked();
        invalid.completed = true;
        assert!(store
            .commit(run.run_id, RunUpdate::single("select", invalid))
            .await
            .is_err());

        assert_eq!(fs::read(store.run_path(run.run_id)).unwrap(), before);
    }
}
