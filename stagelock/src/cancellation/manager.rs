//! Registry of in-flight operations and their checkpoints.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::CancellationToken;
use crate::core::Checkpoint;

/// Tracks active operations, their cancellation tokens and last checkpoints.
///
/// At most one operation per id is active. The last checkpoint of an
/// operation that ended without committing is retained until the same id
/// begins again.
#[derive(Debug, Default)]
pub struct CheckpointManager {
    active: DashMap<String, Arc<CancellationToken>>,
    retained: DashMap<String, Checkpoint>,
    superseded: DashSet<String>,
}

impl CheckpointManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Operation id of a `(run, stage)` pair.
    #[must_use]
    pub fn operation_id(run_id: Uuid, stage: &str) -> String {
        format!("{run_id}:{stage}")
    }

    /// Registers a new active operation.
    ///
    /// Returns `None` if an operation with the same id is already active.
    pub fn begin_operation(&self, operation_id: &str) -> Option<Arc<CancellationToken>> {
        match self.active.entry(operation_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let token = Arc::new(CancellationToken::new(operation_id));
                vacant.insert(token.clone());
                self.retained.remove(operation_id);
                self.superseded.remove(operation_id);
                debug!(operation_id, "Operation started");
                Some(token)
            }
        }
    }

    /// Requests cancellation of an active operation.
    ///
    /// Returns false if no such operation is active.
    pub fn request_cancel(&self, operation_id: &str, reason: &str) -> bool {
        let token = self.active.get(operation_id).map(|entry| entry.value().clone());
        match token {
            Some(token) => {
                info!(operation_id, reason, "Cancelling operation");
                token.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Marks an active operation as superseded and cancels it.
    ///
    /// A superseded operation must not commit its result. Returns false if no
    /// such operation is active.
    pub fn supersede(&self, operation_id: &str, reason: &str) -> bool {
        if !self.request_cancel(operation_id, reason) {
            return false;
        }
        self.superseded.insert(operation_id.to_string());
        true
    }

    /// Returns true if the active operation was superseded.
    #[must_use]
    pub fn is_superseded(&self, operation_id: &str) -> bool {
        self.superseded.contains(operation_id)
    }

    /// Returns the last checkpoint of an active or ended operation.
    #[must_use]
    pub fn last_checkpoint(&self, operation_id: &str) -> Option<Checkpoint> {
        if let Some(token) = self.active.get(operation_id) {
            if let Some(checkpoint) = token.last_checkpoint() {
                return Some(checkpoint);
            }
        }
        self.retained
            .get(operation_id)
            .map(|entry| entry.value().clone())
    }

    /// Ends an operation, retaining its last checkpoint.
    pub fn end_operation(&self, operation_id: &str) {
        self.finish(operation_id, true);
    }

    /// Ends an operation whose result was committed.
    ///
    /// The run record holds its checkpoint from now on, so nothing is
    /// retained.
    pub fn end_committed_operation(&self, operation_id: &str) {
        self.finish(operation_id, false);
    }

    fn finish(&self, operation_id: &str, retain: bool) {
        self.superseded.remove(operation_id);
        if let Some((_, token)) = self.active.remove(operation_id) {
            if let Some(checkpoint) = token.last_checkpoint().filter(|_| retain) {
                self.retained.insert(operation_id.to_string(), checkpoint);
            }
            debug!(operation_id, cancelled = token.is_cancelled(), retain, "Operation ended");
        }
    }

    /// Number of checkpoints retained from ended operations.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    /// Returns true if the operation is active.
    #[must_use]
    pub fn is_active(&self, operation_id: &str) -> bool {
        self.active.contains_key(operation_id)
    }

    /// Returns the ids of all active operations, sorted.
    #[must_use]
    pub fn active_operations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

/// Ends an operation when dropped, so early returns and panics in the
/// caller never leave it active.
#[derive(Debug)]
pub struct OperationGuard {
    manager: Arc<CheckpointManager>,
    operation_id: String,
    committed: bool,
}

impl OperationGuard {
    /// Guards an operation that has already begun.
    #[must_use]
    pub fn new(manager: Arc<CheckpointManager>, operation_id: impl Into<String>) -> Self {
        Self {
            manager,
            operation_id: operation_id.into(),
            committed: false,
        }
    }

    /// Records that the operation's result was committed.
    pub fn mark_committed(&mut self) {
        self.committed = true;
    }

    /// Returns the guarded operation id.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if self.committed {
            self.manager.end_committed_operation(&self.operation_id);
        } else {
            self.manager.end_operation(&self.operation_id);
        }
    }
}
