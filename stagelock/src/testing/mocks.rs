//! Mock executors for testing.

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::engine::{ExecutionContext, ExecutionOutcome, Interrupted, StageExecutor};

/// An executor that records calls and completes with a configurable payload.
#[derive(Debug)]
pub struct RecordingExecutor {
    payload: Mutex<Value>,
    contexts: Mutex<Vec<ExecutionContext>>,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingExecutor {
    /// Creates a recording executor with an empty object payload.
    #[must_use]
    pub fn new() -> Self {
        Self::with_payload(json!({}))
    }

    /// Creates a recording executor returning `payload`.
    #[must_use]
    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Mutex::new(payload),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Sets the payload to return.
    pub fn set_payload(&self, payload: Value) {
        *self.payload.lock() = payload;
    }

    /// Returns the number of times the executor ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns the number of times the executor ran for `stage`.
    #[must_use]
    pub fn calls_for(&self, stage: &str) -> usize {
        self.contexts
            .lock()
            .iter()
            .filter(|ctx| ctx.stage == stage)
            .count()
    }

    /// Returns the recorded contexts.
    #[must_use]
    pub fn contexts(&self) -> Vec<ExecutionContext> {
        self.contexts.lock().clone()
    }

    /// Clears the recorded calls.
    pub fn reset(&self) {
        self.contexts.lock().clear();
    }
}

#[async_trait]
impl StageExecutor for RecordingExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutcome, Interrupted> {
        self.contexts.lock().push(ctx);
        Ok(ExecutionOutcome::completed(self.payload.lock().clone()))
    }
}

/// An executor that walks a fixed number of items and checkpoints as it goes.
///
/// It can pause once right after a given checkpoint so a test can act while
/// the execution is in flight. Resumed executions start at the offset of the
/// checkpoint they were handed.
#[derive(Debug)]
pub struct CheckpointingExecutor {
    total_items: u64,
    every: u64,
    pause_at: Mutex<Option<u64>>,
    paused: Notify,
    release: Notify,
    resume_offsets: Mutex<Vec<u64>>,
}

impl CheckpointingExecutor {
    /// Creates an executor over `total_items`, checkpointing every `every`
    /// items.
    #[must_use]
    pub fn new(total_items: u64, every: u64) -> Self {
        Self {
            total_items,
            every: every.max(1),
            pause_at: Mutex::new(None),
            paused: Notify::new(),
            release: Notify::new(),
            resume_offsets: Mutex::new(Vec::new()),
        }
    }

    /// Pauses the next execution after the checkpoint at `item`.
    #[must_use]
    pub fn pause_at(self, item: u64) -> Self {
        *self.pause_at.lock() = Some(item);
        self
    }

    /// Waits until the execution reached its pause point.
    pub async fn wait_paused(&self) {
        self.paused.notified().await;
    }

    /// Lets a paused execution continue.
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Returns the resume offset of every execution, in call order.
    #[must_use]
    pub fn resume_offsets(&self) -> Vec<u64> {
        self.resume_offsets.lock().clone()
    }

    /// Returns the number of times the executor ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.resume_offsets.lock().len()
    }
}

#[async_trait]
impl StageExecutor for CheckpointingExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutcome, Interrupted> {
        let mut done = ctx.resume_offset().min(self.total_items);
        self.resume_offsets.lock().push(done);

        while done < self.total_items {
            done = (done + self.every).min(self.total_items);
            ctx.checkpoint(done, Some(self.total_items), json!({ "item": done }))?;

            let pause = {
                let mut pause_at = self.pause_at.lock();
                if *pause_at == Some(done) {
                    pause_at.take()
                } else {
                    None
                }
            };
            if pause.is_some() {
                self.paused.notify_one();
                self.release.notified().await;
                ctx.token.check()?;
            }
            tokio::task::yield_now().await;
        }

        Ok(ExecutionOutcome::completed(
            json!({ "items": self.total_items }),
        ))
    }
}

/// An executor that stops early and reports a partial result.
#[derive(Debug)]
pub struct PartialExecutor {
    completed_items: u64,
    total_items: u64,
}

impl PartialExecutor {
    /// Creates an executor that gets through `completed_items` of
    /// `total_items`.
    #[must_use]
    pub fn new(completed_items: u64, total_items: u64) -> Self {
        Self {
            completed_items,
            total_items,
        }
    }
}

#[async_trait]
impl StageExecutor for PartialExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutcome, Interrupted> {
        ctx.checkpoint(
            self.completed_items,
            Some(self.total_items),
            json!({ "item": self.completed_items }),
        )?;
        Ok(ExecutionOutcome::partial(
            json!({ "items": self.completed_items }),
        ))
    }
}

/// An executor that always fails, either with an error or a panic.
#[derive(Debug)]
pub struct FailingExecutor {
    message: String,
    panics: bool,
    calls: Mutex<usize>,
}

impl FailingExecutor {
    /// Creates an executor returning an error with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            panics: false,
            calls: Mutex::new(0),
        }
    }

    /// Creates an executor panicking with `message`.
    #[must_use]
    pub fn panicking(message: impl Into<String>) -> Self {
        Self {
            panics: true,
            ..Self::new(message)
        }
    }

    /// Returns the number of times the executor ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl StageExecutor for FailingExecutor {
    async fn execute(&self, _ctx: ExecutionContext) -> Result<ExecutionOutcome, Interrupted> {
        *self.calls.lock() += 1;
        if self.panics {
            panic!("{}", self.message);
        }
        Err(anyhow!("{}", self.message).into())
    }
}
