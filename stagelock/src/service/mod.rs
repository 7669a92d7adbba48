//! Request boundary over the transition engine.
//!
//! [`StageService`] resolves the executor for each stage by name and turns
//! engine errors into serializable [`ErrorReport`]s.

mod report;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core::{Checkpoint, Run};
use crate::engine::{LockOutcome, StageExecutor, TransitionEngine, UnlockOutcome};
use crate::errors::{EngineError, NotFoundError};
use crate::identity::StageInputs;

pub use report::{to_reply, ErrorReport};

/// Stage operations with executors registered by stage name.
pub struct StageService {
    engine: Arc<TransitionEngine>,
    executors: RwLock<HashMap<String, Arc<dyn StageExecutor>>>,
}

impl std::fmt::Debug for StageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageService")
            .field("engine", &self.engine)
            .field("executors", &self.registered())
            .finish()
    }
}

impl StageService {
    /// Creates a service with no executors.
    #[must_use]
    pub fn new(engine: Arc<TransitionEngine>) -> Self {
        Self {
            engine,
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<TransitionEngine> {
        &self.engine
    }

    /// Registers the executor of a stage, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Stage`] if the graph has no such stage.
    pub fn register(
        &self,
        stage: impl Into<String>,
        executor: Arc<dyn StageExecutor>,
    ) -> Result<(), EngineError> {
        let stage = stage.into();
        if !self.engine.graph().contains(&stage) {
            return Err(NotFoundError::Stage(stage).into());
        }
        debug!(stage = %stage, "Executor registered");
        self.executors.write().insert(stage, executor);
        Ok(())
    }

    /// Returns the stages with a registered executor, in pipeline order.
    #[must_use]
    pub fn registered(&self) -> Vec<String> {
        let executors = self.executors.read();
        self.engine
            .graph()
            .stages()
            .into_iter()
            .filter(|stage| executors.contains_key(*stage))
            .map(str::to_string)
            .collect()
    }

    /// Creates a run.
    pub async fn create_run(&self) -> Result<Run, EngineError> {
        self.engine.create_run().await
    }

    /// Reads a run.
    pub async fn get_run(&self, run_id: Uuid) -> Result<Run, EngineError> {
        self.engine.get_run(run_id).await
    }

    /// Locks a stage with its registered executor.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoExecutor`] if the stage has no executor, and
    /// otherwise whatever [`TransitionEngine::lock_stage`] returns.
    pub async fn lock_stage(
        &self,
        run_id: Uuid,
        inputs: impl Into<StageInputs>,
    ) -> Result<LockOutcome, EngineError> {
        let inputs = inputs.into();
        let executor = self
            .executors
            .read()
            .get(&inputs.stage)
            .cloned()
            .ok_or_else(|| EngineError::NoExecutor(inputs.stage.clone()))?;

        self.engine
            .lock_stage(run_id, &inputs, executor.as_ref())
            .await
    }

    /// Unlocks a stage and its cascade closure.
    pub async fn unlock_stage(&self, run_id: Uuid, stage: &str) -> Result<UnlockOutcome, EngineError> {
        self.engine.unlock_stage(run_id, stage).await
    }

    /// Requests cancellation of a running stage.
    pub async fn cancel_stage(&self, run_id: Uuid, stage: &str) -> Result<bool, EngineError> {
        self.engine.cancel_stage(run_id, stage).await
    }

    /// Returns the latest checkpoint of a stage.
    pub async fn last_checkpoint(
        &self,
        run_id: Uuid,
        stage: &str,
    ) -> Result<Option<Checkpoint>, EngineError> {
        self.engine.last_checkpoint(run_id, stage).await
    }
}
