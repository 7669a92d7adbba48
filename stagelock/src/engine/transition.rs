//! The transition engine.
//!
//! Per stage: `UNLOCKED -> LOCKED (incomplete) -> LOCKED (completed)`, and
//! back to `UNLOCKED` from any locked state by explicit unlock or cascade.
//!
//! Run state is only touched under a per-run mutex, and that mutex is never
//! held while an executor runs. An execution therefore happens between two
//! short critical sections: the first validates gates and looks for a
//! reusable artifact, the second re-validates gates and commits.
//!
//! Re-locking a locked stage under a different stage id, or dropping its
//! completion, unlocks its cascade closure in the same commit. Unlocking a
//! stage supersedes in-flight executions in its closure, and those results
//! are never committed.

use anyhow::anyhow;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::{ExecutionContext, ExecutionOutcome, Interrupted, StageExecutor};
use super::gate::check_gate;
use crate::artifacts::ArtifactStore;
use crate::cancellation::{CheckpointManager, OperationGuard};
use crate::core::{ArtifactDraft, Checkpoint, Run, StageEvent, StageStatus};
use crate::errors::{EngineError, NotFoundError};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::graph::StageGraphConfig;
use crate::identity::{
    compute_stage_id_with, input_digest, EffectiveInputs, IdentityConfig, StageId, StageInputs,
};
use crate::observability::SpanTimer;
use crate::store::{RunStateStore, RunUpdate};

/// How a lock request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDisposition {
    /// The executor ran to completion.
    Executed,
    /// An existing artifact was reused; the executor did not run.
    Reused,
    /// The executor returned a partial result.
    Partial,
    /// The execution was cancelled at a checkpoint.
    Cancelled,
}

/// Result of a lock request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockOutcome {
    /// The locked stage.
    pub stage: String,
    /// Its persisted status.
    pub status: StageStatus,
    /// How the lock was satisfied.
    pub disposition: LockDisposition,
}

impl LockOutcome {
    /// Returns true if the stage ended locked and completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.completed
    }
}

/// Result of an unlock request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockOutcome {
    /// The explicitly unlocked stage.
    pub stage: String,
    /// Its persisted status.
    pub status: StageStatus,
    /// Downstream stages that were locked and got unlocked by cascade, in
    /// pipeline order.
    pub cascaded: Vec<String>,
}

/// Drives stage transitions for runs of one stage graph.
pub struct TransitionEngine {
    graph: Arc<StageGraphConfig>,
    store: Arc<dyn RunStateStore>,
    artifacts: Arc<dyn ArtifactStore>,
    checkpoints: Arc<CheckpointManager>,
    events: Arc<dyn EventSink>,
    identity: IdentityConfig,
    run_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("stages", &self.graph.stages())
            .field("identity", &self.identity)
            .field("active_operations", &self.checkpoints.active_operations())
            .finish_non_exhaustive()
    }
}

impl TransitionEngine {
    /// Creates an engine with no event sink and default identity settings.
    #[must_use]
    pub fn new(
        graph: Arc<StageGraphConfig>,
        store: Arc<dyn RunStateStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            graph,
            store,
            artifacts,
            checkpoints: Arc::new(CheckpointManager::new()),
            events: Arc::new(NoOpEventSink),
            identity: IdentityConfig::default(),
            run_locks: DashMap::new(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the identity settings.
    #[must_use]
    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the stage graph.
    #[must_use]
    pub fn graph(&self) -> &Arc<StageGraphConfig> {
        &self.graph
    }

    /// Returns the checkpoint manager.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Computes the stage id a lock request would use.
    #[must_use]
    pub fn stage_id_for(&self, run_id: Uuid, inputs: &StageInputs) -> StageId {
        compute_stage_id_with(&EffectiveInputs::for_stage(run_id, inputs), &self.identity)
    }

    /// Creates a run with every stage unlocked.
    pub async fn create_run(&self) -> Result<Run, EngineError> {
        let run = self.store.create_run(&self.graph).await?;
        info!(run_id = %run.run_id, stages = run.stages.len(), "Run created");
        Ok(run)
    }

    /// Reads a run.
    pub async fn get_run(&self, run_id: Uuid) -> Result<Run, EngineError> {
        Ok(self.store.get_run(run_id).await?)
    }

    /// Locks a stage, reusing an existing artifact or running the executor.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Gate`] if a prerequisite is unmet, before or after
    ///   execution; nothing is committed.
    /// - [`EngineError::AlreadyInProgress`] if the stage is already executing.
    /// - [`EngineError::Superseded`] if an upstream unlock invalidated the
    ///   execution; nothing is committed.
    /// - [`EngineError::IdentityCollision`] if the stage id matches an artifact
    ///   built from different inputs.
    /// - [`EngineError::Execution`] if the executor fails; nothing is committed.
    /// - [`EngineError::Persistence`] if a store write fails; nothing is
    ///   committed.
    pub async fn lock_stage(
        &self,
        run_id: Uuid,
        inputs: &StageInputs,
        executor: &dyn StageExecutor,
    ) -> Result<LockOutcome, EngineError> {
        let stage = inputs.stage.as_str();
        let closure = self.graph.cascade_closure(stage)?;

        let effective = EffectiveInputs::for_stage(run_id, inputs);
        let stage_id = compute_stage_id_with(&effective, &self.identity);
        let digest = input_digest(&effective);
        let operation_id = CheckpointManager::operation_id(run_id, stage);

        let run_lock = self.run_lock(run_id).await?;

        let (token, mut guard, resume_from) = {
            let _held = run_lock.lock().await;
            let run = self.store.get_run(run_id).await?;
            check_gate(&self.graph, &run, stage)?;

            let Some(token) = self.checkpoints.begin_operation(&operation_id) else {
                debug!(run_id = %run_id, stage, "Stage already executing");
                return Err(EngineError::AlreadyInProgress {
                    run_id,
                    stage: stage.to_string(),
                });
            };
            let mut guard = OperationGuard::new(self.checkpoints.clone(), operation_id.clone());

            if let Some(record) = self.artifacts.find(run_id, stage, &stage_id).await? {
                if record.input_digest != digest {
                    warn!(
                        run_id = %run_id,
                        stage,
                        stage_id = %stage_id,
                        "Stage id collision detected, refusing reuse"
                    );
                    return Err(EngineError::IdentityCollision {
                        stage: stage.to_string(),
                        stage_id: stage_id.to_string(),
                        stored_digest: record.input_digest,
                        requested_digest: digest,
                    });
                }

                let status = StageStatus::completed(stage_id.clone(), record.artifact_ref);
                let (update, cascaded) = self.lock_update(&run, stage, &status, &closure);
                self.store.commit(run_id, update).await?;
                guard.mark_committed();
                info!(run_id = %run_id, stage, stage_id = %stage_id, "Stage locked by reuse");
                self.emit(StageEvent::new(types::STAGE_REUSED, run_id, stage).add_data(
                    "stage_id",
                    serde_json::json!(stage_id.as_str()),
                ))
                .await;
                self.emit_cascade(run_id, stage, &cascaded).await;
                return Ok(LockOutcome {
                    stage: stage.to_string(),
                    status,
                    disposition: LockDisposition::Reused,
                });
            }

            let resume_from = run
                .stage(stage)
                .and_then(|status| status.resumable_checkpoint_for(&stage_id))
                .cloned();
            (token, guard, resume_from)
        };

        if let Some(checkpoint) = &resume_from {
            info!(
                run_id = %run_id,
                stage,
                completed_items = checkpoint.completed_items,
                "Resuming from checkpoint"
            );
        }

        let ctx = ExecutionContext {
            run_id,
            stage: stage.to_string(),
            stage_id: stage_id.clone(),
            inputs: inputs.clone(),
            token: token.clone(),
            resume_from,
        };

        let timer = SpanTimer::start(format!("{stage}.execute"));
        let result = match AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Interrupted::Failed(anyhow!(
                "executor panicked: {}",
                panic_message(&*panic)
            ))),
        };
        let elapsed_ms = timer.finish();

        let (status, disposition) = match result {
            Ok(ExecutionOutcome::Completed { payload }) => {
                if token.is_cancelled() {
                    debug!(run_id = %run_id, stage, "Execution completed despite cancellation request");
                }
                let artifact_ref = self
                    .artifacts
                    .store(ArtifactDraft {
                        run_id,
                        stage: stage.to_string(),
                        stage_id: stage_id.clone(),
                        input_digest: digest,
                        reusable: true,
                        payload,
                    })
                    .await?;
                (
                    StageStatus::completed(stage_id.clone(), artifact_ref),
                    LockDisposition::Executed,
                )
            }
            Ok(ExecutionOutcome::Partial { payload }) => {
                let artifact_ref = self
                    .artifacts
                    .store(ArtifactDraft {
                        run_id,
                        stage: stage.to_string(),
                        stage_id: stage_id.clone(),
                        input_digest: digest,
                        reusable: false,
                        payload,
                    })
                    .await?;
                (
                    StageStatus::incomplete(
                        stage_id.clone(),
                        Some(artifact_ref),
                        token.last_checkpoint(),
                    ),
                    LockDisposition::Partial,
                )
            }
            Err(Interrupted::Cancelled(cancelled)) => {
                let checkpoint: Option<Checkpoint> =
                    cancelled.last_checkpoint.or_else(|| token.last_checkpoint());
                (
                    StageStatus::incomplete(stage_id.clone(), None, checkpoint),
                    LockDisposition::Cancelled,
                )
            }
            Err(Interrupted::Failed(err)) => {
                warn!(run_id = %run_id, stage, elapsed_ms, error = %err, "Stage execution failed");
                return Err(EngineError::Execution {
                    stage: stage.to_string(),
                    message: format!("{err:#}"),
                });
            }
        };

        let cascaded = {
            let _held = run_lock.lock().await;
            let run = self.store.get_run(run_id).await?;
            if let Err(check) = check_gate(&self.graph, &run, stage) {
                warn!(
                    run_id = %run_id,
                    stage,
                    "Prerequisite changed during execution, result not committed"
                );
                return Err(check.into());
            }
            if self.checkpoints.is_superseded(&operation_id) {
                warn!(
                    run_id = %run_id,
                    stage,
                    "Upstream unlocked during execution, result not committed"
                );
                return Err(EngineError::Superseded {
                    run_id,
                    stage: stage.to_string(),
                });
            }
            let (update, cascaded) = self.lock_update(&run, stage, &status, &closure);
            self.store.commit(run_id, update).await?;
            guard.mark_committed();
            cascaded
        };

        let event_type = match disposition {
            LockDisposition::Executed => {
                info!(run_id = %run_id, stage, stage_id = %stage_id, elapsed_ms, "Stage locked");
                types::STAGE_LOCKED
            }
            LockDisposition::Partial => {
                info!(run_id = %run_id, stage, stage_id = %stage_id, elapsed_ms, "Stage locked with partial result");
                types::STAGE_PARTIAL
            }
            LockDisposition::Cancelled => {
                warn!(
                    run_id = %run_id,
                    stage,
                    stage_id = %stage_id,
                    completed_items = ?status.checkpoint.as_ref().map(|cp| cp.completed_items),
                    "Stage execution cancelled"
                );
                types::STAGE_CANCELLED
            }
            LockDisposition::Reused => types::STAGE_REUSED,
        };

        let mut event = StageEvent::new(event_type, run_id, stage)
            .add_data("stage_id", serde_json::json!(stage_id.as_str()))
            .add_data("duration_ms", serde_json::json!(elapsed_ms));
        if let Some(artifact_ref) = &status.artifact_ref {
            event = event.add_data("artifact_ref", serde_json::json!(artifact_ref.as_str()));
        }
        self.emit(event).await;
        self.emit_cascade(run_id, stage, &cascaded).await;

        Ok(LockOutcome {
            stage: stage.to_string(),
            status,
            disposition,
        })
    }

    /// Unlocks a stage and every locked stage in its cascade closure, in one
    /// atomic commit. Artifacts are kept.
    ///
    /// Stages that are already unlocked are left untouched. Executions in
    /// flight downstream are superseded.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyInProgress`] if the stage itself is executing;
    ///   cancel it first.
    /// - [`EngineError::Persistence`] if the commit fails; nothing changes.
    pub async fn unlock_stage(&self, run_id: Uuid, stage: &str) -> Result<UnlockOutcome, EngineError> {
        let closure = self.graph.cascade_closure(stage)?;
        let run_lock = self.run_lock(run_id).await?;

        let (status, cascaded, was_locked) = {
            let _held = run_lock.lock().await;
            if self
                .checkpoints
                .is_active(&CheckpointManager::operation_id(run_id, stage))
            {
                debug!(run_id = %run_id, stage, "Refusing to unlock an executing stage");
                return Err(EngineError::AlreadyInProgress {
                    run_id,
                    stage: stage.to_string(),
                });
            }

            let run = self.store.get_run(run_id).await?;
            let current = run
                .stage(stage)
                .ok_or_else(|| NotFoundError::Stage(stage.to_string()))?;

            let mut update = RunUpdate::new().with_current(stage);
            let was_locked = current.is_locked();
            let status = if was_locked {
                current.clone().into_unlocked()
            } else {
                current.clone()
            };
            if was_locked {
                update = update.with_stage(stage, status.clone());
            }

            let (update, cascaded) = self.cascade(&run, stage, &closure, update);
            self.store.commit(run_id, update).await?;
            (status, cascaded, was_locked)
        };

        info!(
            run_id = %run_id,
            stage,
            cascaded = ?cascaded,
            "Stage unlocked"
        );

        if was_locked {
            self.emit(StageEvent::new(types::STAGE_UNLOCKED, run_id, stage))
                .await;
        }
        self.emit_cascade(run_id, stage, &cascaded).await;

        Ok(UnlockOutcome {
            stage: stage.to_string(),
            status,
            cascaded,
        })
    }

    /// Requests cancellation of the in-flight execution of a stage.
    ///
    /// Returns false if the stage is not executing.
    pub async fn cancel_stage(&self, run_id: Uuid, stage: &str) -> Result<bool, EngineError> {
        if !self.graph.contains(stage) {
            return Err(NotFoundError::Stage(stage.to_string()).into());
        }
        self.store.get_run(run_id).await?;

        let operation_id = CheckpointManager::operation_id(run_id, stage);
        Ok(self
            .checkpoints
            .request_cancel(&operation_id, "cancellation requested"))
    }

    /// Returns the latest checkpoint of a stage.
    ///
    /// Live progress of an in-flight or recently ended execution wins over
    /// the checkpoint persisted in the run record.
    pub async fn last_checkpoint(
        &self,
        run_id: Uuid,
        stage: &str,
    ) -> Result<Option<Checkpoint>, EngineError> {
        let operation_id = CheckpointManager::operation_id(run_id, stage);
        if let Some(checkpoint) = self.checkpoints.last_checkpoint(&operation_id) {
            return Ok(Some(checkpoint));
        }
        let status = self.store.read_stage(run_id, stage).await?;
        Ok(status.checkpoint)
    }

    /// Builds the commit of a new status for `stage`.
    ///
    /// A locked stage that changes identity or loses its completion takes
    /// its cascade closure down with it.
    fn lock_update(
        &self,
        run: &Run,
        stage: &str,
        status: &StageStatus,
        closure: &[String],
    ) -> (RunUpdate, Vec<String>) {
        let update = RunUpdate::single(stage, status.clone()).with_current(stage);
        let invalidates = run.stage(stage).is_some_and(|current| {
            current.is_locked()
                && (current.stage_id != status.stage_id || (current.completed && !status.completed))
        });
        if invalidates {
            debug!(run_id = %run.run_id, stage, "Locked stage changed, unlocking downstream");
            self.cascade(run, stage, closure, update)
        } else {
            (update, Vec::new())
        }
    }

    /// Adds an unlock of every locked stage in `closure` to `update` and
    /// supersedes executions in flight there. Returns the unlocked stages.
    fn cascade(
        &self,
        run: &Run,
        source: &str,
        closure: &[String],
        mut update: RunUpdate,
    ) -> (RunUpdate, Vec<String>) {
        let mut cascaded = Vec::new();
        for target in closure {
            let operation_id = CheckpointManager::operation_id(run.run_id, target);
            if self.checkpoints.supersede(&operation_id, "upstream stage unlocked") {
                debug!(run_id = %run.run_id, stage = %target, source, "Execution superseded");
            }
            if let Some(status) = run.stage(target).filter(|s| s.is_locked()) {
                update = update.with_stage(target.clone(), status.clone().into_unlocked());
                cascaded.push(target.clone());
            }
        }
        (update, cascaded)
    }

    /// Returns the mutex of an existing run.
    async fn run_lock(&self, run_id: Uuid) -> Result<Arc<Mutex<()>>, EngineError> {
        if let Some(lock) = self.run_locks.get(&run_id) {
            return Ok(lock.value().clone());
        }
        self.store.get_run(run_id).await?;
        Ok(self
            .run_locks
            .entry(run_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    #[cfg(test)]
    pub(crate) fn tracked_runs(&self) -> usize {
        self.run_locks.len()
    }

    async fn emit(&self, event: StageEvent) {
        self.events.emit(&event).await;
    }

    async fn emit_cascade(&self, run_id: Uuid, source: &str, cascaded: &[String]) {
        for target in cascaded {
            self.emit(
                StageEvent::new(types::STAGE_CASCADE_UNLOCKED, run_id, target.clone())
                    .add_data("source", serde_json::json!(source)),
            )
            .await;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
