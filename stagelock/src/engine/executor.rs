//! Stage executor boundary.
//!
//! Executors perform the actual stage work. They receive the stage inputs,
//! its identity and a cancellation token, and report progress through the
//! token's checkpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::cancellation::{CancellationToken, Cancelled};
use crate::core::Checkpoint;
use crate::identity::{StageId, StageInputs};

/// Everything an executor gets for one execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The owning run.
    pub run_id: Uuid,
    /// The stage being executed.
    pub stage: String,
    /// Identity of the inputs.
    pub stage_id: StageId,
    /// The stage inputs.
    pub inputs: StageInputs,
    /// Cancellation token of this execution.
    pub token: Arc<CancellationToken>,
    /// Checkpoint of an earlier incomplete execution with the same identity.
    pub resume_from: Option<Checkpoint>,
}

impl ExecutionContext {
    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Records progress, then reports a pending cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if cancellation has been requested.
    pub fn checkpoint(
        &self,
        completed_items: u64,
        total_items: Option<u64>,
        marker: serde_json::Value,
    ) -> Result<(), Cancelled> {
        self.token.checkpoint(completed_items, total_items, marker)
    }

    /// Returns the number of items already processed by the execution being
    /// resumed, or zero.
    #[must_use]
    pub fn resume_offset(&self) -> u64 {
        self.resume_from
            .as_ref()
            .map_or(0, |checkpoint| checkpoint.completed_items)
    }
}

/// Result of an execution that ran to an end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// All work done; the payload becomes a reusable artifact.
    Completed {
        /// Artifact payload.
        payload: serde_json::Value,
    },
    /// Work ended early; the payload is stored but never reused.
    Partial {
        /// Artifact payload.
        payload: serde_json::Value,
    },
}

impl ExecutionOutcome {
    /// A completed outcome.
    #[must_use]
    pub fn completed(payload: serde_json::Value) -> Self {
        Self::Completed { payload }
    }

    /// A partial outcome.
    #[must_use]
    pub fn partial(payload: serde_json::Value) -> Self {
        Self::Partial { payload }
    }
}

/// An execution that did not produce an outcome.
#[derive(Debug, Error)]
pub enum Interrupted {
    /// Cancellation took effect at a checkpoint.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// The executor failed.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Performs the work of one stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Executes the stage.
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutcome, Interrupted>;
}

/// An executor backed by an async closure.
pub struct FnExecutor<F, Fut>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutionOutcome, Interrupted>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnExecutor<F, Fut>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutionOutcome, Interrupted>> + Send,
{
    /// Creates a new closure executor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }

    /// Returns the executor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<F, Fut> Debug for FnExecutor<F, Fut>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutionOutcome, Interrupted>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> StageExecutor for FnExecutor<F, Fut>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutionOutcome, Interrupted>> + Send,
{
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutcome, Interrupted> {
        (self.func)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext {
            run_id: Uuid::nil(),
            stage: "preview".to_string(),
            stage_id: StageId::new("0123456789abcdef"),
            inputs: StageInputs::new("preview").with("rows", json!(5)),
            token: Arc::new(CancellationToken::new("op")),
            resume_from: None,
        }
    }

    #[tokio::test]
    async fn test_fn_executor() {
        let executor = FnExecutor::new("preview", |ctx: ExecutionContext| async move {
            let rows = ctx.inputs.get("rows").cloned().unwrap_or_default();
            Ok::<_, Interrupted>(ExecutionOutcome::completed(json!({ "rows": rows })))
        });

        let outcome = executor.execute(context()).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::completed(json!({"rows": 5})));
        assert_eq!(executor.name(), "preview");
    }

    #[tokio::test]
    async fn test_cancelled_checkpoint_propagates_with_question_mark() {
        let executor = FnExecutor::new("transform", |ctx: ExecutionContext| async move {
            for item in 0..10 {
                ctx.checkpoint(item + 1, Some(10), json!(item))?;
            }
            Ok::<_, Interrupted>(ExecutionOutcome::completed(json!(null)))
        });

        let ctx = context();
        ctx.token.cancel("stop");
        let err = executor.execute(ctx).await.unwrap_err();

        match err {
            Interrupted::Cancelled(cancelled) => {
                assert_eq!(cancelled.last_checkpoint.unwrap().completed_items, 1);
            }
            Interrupted::Failed(e) => panic!("unexpected failure: {e}"),
        }
    }

    #[tokio::test]
    async fn test_failed_executor_wraps_anyhow() {
        let executor = FnExecutor::new("probe", |_ctx: ExecutionContext| async move {
            Err::<ExecutionOutcome, _>(Interrupted::from(anyhow::anyhow!("connection refused")))
        });

        let err = executor.execute(context()).await.unwrap_err();
        assert!(matches!(err, Interrupted::Failed(_)));
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_resume_offset() {
        let mut ctx = context();
        assert_eq!(ctx.resume_offset(), 0);
        ctx.resume_from = Some(Checkpoint::new("op", 7, Some(10)));
        assert_eq!(ctx.resume_offset(), 7);
    }
}
