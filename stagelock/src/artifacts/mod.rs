//! Artifact persistence.
//!
//! Artifacts are never deleted here: unlock and cancellation only change run
//! state, so an unlocked stage's artifact stays available for reuse.

mod file;
mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{ArtifactDraft, ArtifactRecord, ArtifactRef};
use crate::errors::EngineError;
use crate::identity::StageId;

pub use file::FileArtifactStore;
pub use memory::InMemoryArtifactStore;

/// Storage backend for stage artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns the reusable artifact stored for `(run, stage, stage_id)`.
    async fn find(
        &self,
        run_id: Uuid,
        stage: &str,
        stage_id: &StageId,
    ) -> Result<Option<ArtifactRecord>, EngineError>;

    /// Returns true if a reusable artifact exists for `(run, stage, stage_id)`.
    async fn exists(&self, run_id: Uuid, stage: &str, stage_id: &StageId) -> Result<bool, EngineError> {
        Ok(self.find(run_id, stage, stage_id).await?.is_some())
    }

    /// Stores an artifact and returns its reference.
    ///
    /// Storing a reusable draft whose reference already exists keeps the
    /// existing artifact and returns its reference.
    async fn store(&self, draft: ArtifactDraft) -> Result<ArtifactRef, EngineError>;

    /// Reads an artifact's full record.
    async fn record(&self, artifact_ref: &ArtifactRef) -> Result<ArtifactRecord, EngineError>;

    /// Reads an artifact's payload.
    async fn read(&self, artifact_ref: &ArtifactRef) -> Result<serde_json::Value, EngineError> {
        Ok(self.record(artifact_ref).await?.payload)
    }
}
