//! File-backed artifact store.
//!
//! Layout: `<root>/<run_id>/<stage>/<stage_id>.json` for reusable artifacts,
//! with a `.partial.<suffix>` infix for partial ones.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::ArtifactStore;
use crate::core::{ArtifactDraft, ArtifactRecord, ArtifactRef};
use crate::errors::{EngineError, NotFoundError, PersistenceError};
use crate::identity::StageId;
use crate::store::write_atomic;

/// Artifact store writing one JSON document per artifact.
#[derive(Debug)]
pub struct FileArtifactStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileArtifactStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| PersistenceError::io(&root, e))?;
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

    fn path_for(&self, artifact_ref: &ArtifactRef) -> Result<PathBuf, EngineError> {
        let relative = Path::new(artifact_ref.as_str());
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(NotFoundError::Artifact(artifact_ref.to_string()).into());
        }
        Ok(self.root.join(format!("{artifact_ref}.json")))
    }

    fn load(&self, artifact_ref: &ArtifactRef) -> Result<Option<ArtifactRecord>, EngineError> {
        let path = self.path_for(artifact_ref)?;
        match fs::read(&path) {
            Ok(bytes) => {
                let record = serde_json::from_slice(&bytes).map_err(PersistenceError::from)?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(&path, e).into()),
        }
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn find(
        &self,
        run_id: Uuid,
        stage: &str,
        stage_id: &StageId,
    ) -> Result<Option<ArtifactRecord>, EngineError> {
        let artifact_ref = ArtifactRef::reusable(run_id, stage, stage_id);
        Ok(self.load(&artifact_ref)?.filter(|record| record.reusable))
    }

    async fn store(&self, draft: ArtifactDraft) -> Result<ArtifactRef, EngineError> {
        let artifact_ref = draft.artifact_ref();
        let path = self.path_for(&artifact_ref)?;

        let _guard = self.write_lock.lock();
        if path.exists() {
            return Ok(artifact_ref);
        }

        let record = ArtifactRecord::from_draft(artifact_ref.clone(), draft);
        let bytes = serde_json::to_vec_pretty(&record).map_err(PersistenceError::from)?;
        write_atomic(&path, &bytes)?;
        debug!(artifact_ref = %artifact_ref, "Stored artifact");
        Ok(artifact_ref)
    }

    async fn record(&self, artifact_ref: &ArtifactRef) -> Result<ArtifactRecord, EngineError> {
        self.load(artifact_ref)?
            .ok_or_else(|| NotFoundError::Artifact(artifact_ref.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(reusable: bool) -> ArtifactDraft {
        ArtifactDraft {
            run_id: Uuid::new_v4(),
            stage: "transform".to_string(),
            stage_id: StageId::new("fedcba9876543210"),
            input_digest: "f".repeat(64),
            reusable,
            payload: json!({"tables": ["orders"]}),
        }
    }

    #[tokio::test]
    async fn test_artifact_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let original = draft(true);
        let artifact_ref = {
            let store = FileArtifactStore::open(dir.path()).unwrap();
            store.store(original.clone()).await.unwrap()
        };

        let reopened = FileArtifactStore::open(dir.path()).unwrap();
        let found = reopened
            .find(original.run_id, "transform", &original.stage_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.artifact_ref, artifact_ref);
        assert_eq!(found.input_digest, original.input_digest);
        assert_eq!(
            reopened.read(&artifact_ref).await.unwrap(),
            json!({"tables": ["orders"]})
        );
    }

    #[tokio::test]
    async fn test_partial_artifact_is_not_reusable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::open(dir.path()).unwrap();
        let partial = draft(false);

        let artifact_ref = store.store(partial.clone()).await.unwrap();

        assert!(store.record(&artifact_ref).await.is_ok());
        assert!(!store
            .exists(partial.run_id, "transform", &partial.stage_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_traversal_refs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::open(dir.path()).unwrap();

        let err = store
            .read(&ArtifactRef::new("../outside"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ARTIFACT-404");
    }
}
