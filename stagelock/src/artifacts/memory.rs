//! In-memory artifact store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::ArtifactStore;
use crate::core::{ArtifactDraft, ArtifactRecord, ArtifactRef};
use crate::errors::{EngineError, NotFoundError};
use crate::identity::StageId;

/// Artifact store backed by a concurrent map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    records: Arc<DashMap<ArtifactRef, ArtifactRecord>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts a record as-is, replacing any record under the same reference.
    ///
    /// Intended for seeding tests with hand-built records.
    pub fn insert_record(&self, record: ArtifactRecord) {
        self.records.insert(record.artifact_ref.clone(), record);
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn find(
        &self,
        run_id: Uuid,
        stage: &str,
        stage_id: &StageId,
    ) -> Result<Option<ArtifactRecord>, EngineError> {
        let key = ArtifactRef::reusable(run_id, stage, stage_id);
        Ok(self
            .records
            .get(&key)
            .filter(|record| record.reusable)
            .map(|record| record.value().clone()))
    }

    async fn store(&self, draft: ArtifactDraft) -> Result<ArtifactRef, EngineError> {
        let artifact_ref = draft.artifact_ref();
        let entry = self.records.entry(artifact_ref.clone());
        if let dashmap::mapref::entry::Entry::Vacant(vacant) = entry {
            vacant.insert(ArtifactRecord::from_draft(artifact_ref.clone(), draft));
            debug!(artifact_ref = %artifact_ref, "Stored artifact");
        }
        Ok(artifact_ref)
    }

    async fn record(&self, artifact_ref: &ArtifactRef) -> Result<ArtifactRecord, EngineError> {
        self.records
            .get(artifact_ref)
            .map(|record| record.value().clone())
            .ok_or_else(|| NotFoundError::Artifact(artifact_ref.to_string()).into())
    }
}
