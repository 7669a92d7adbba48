//! Cancellation token for cooperative cancellation with checkpoint reporting.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::core::Checkpoint;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// Returned by [`CancellationToken::checkpoint`] once cancellation was
/// requested. Executors propagate it with `?`.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("operation {operation_id} cancelled: {reason}")]
pub struct Cancelled {
    /// The cancelled operation.
    pub operation_id: String,
    /// The first cancellation reason.
    pub reason: String,
    /// The last checkpoint recorded before the cancellation took effect.
    pub last_checkpoint: Option<Checkpoint>,
}

/// A token for cooperative cancellation of one operation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
/// The executor reports progress through [`checkpoint`](Self::checkpoint),
/// which is also where a pending cancellation takes effect.
#[derive(Default)]
pub struct CancellationToken {
    /// The operation this token belongs to.
    operation_id: String,
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation.
    callbacks: RwLock<Vec<CancelCallback>>,
    /// Most recent progress report.
    last_checkpoint: RwLock<Option<Checkpoint>>,
    /// Wakes tasks waiting in [`cancelled_wait`](Self::cancelled_wait).
    notify: Notify,
}

impl CancellationToken {
    /// Creates a token for an operation.
    #[must_use]
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            ..Self::default()
        }
    }

    /// Returns the operation id.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Requests cancellation with a reason.
    ///
    /// Only the first reason is kept. Callbacks are invoked immediately;
    /// panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            debug!(operation_id = %self.operation_id, reason = %reason, "Cancellation requested");
            *self.reason.write() = Some(reason);

            let callbacks = self.callbacks.read();
            for callback in callbacks.iter() {
                run_callback(callback.as_ref());
            }
            self.notify.notify_waiters();
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.is_cancelled() {
            run_callback(&callback);
        } else {
            self.callbacks.write().push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Records progress, then reports a pending cancellation.
    ///
    /// The checkpoint is stored even when the call returns `Err`, so the
    /// cancelled outcome carries the latest progress.
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
        self.record(
            Checkpoint::new(self.operation_id.clone(), completed_items, total_items)
                .with_marker(marker),
        );
        self.check()
    }

    /// Stores a checkpoint without checking for cancellation.
    pub fn record(&self, checkpoint: Checkpoint) {
        *self.last_checkpoint.write() = Some(checkpoint);
    }

    /// Returns the most recent checkpoint.
    #[must_use]
    pub fn last_checkpoint(&self) -> Option<Checkpoint> {
        self.last_checkpoint.read().clone()
    }

    /// Returns `Err(Cancelled)` if cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if cancellation has been requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(self.cancelled())
        } else {
            Ok(())
        }
    }

    /// Builds the cancellation result carrying the last checkpoint.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled {
        Cancelled {
            operation_id: self.operation_id.clone(),
            reason: self.reason().unwrap_or_else(|| "cancelled".to_string()),
            last_checkpoint: self.last_checkpoint(),
        }
    }

    /// Waits until cancellation is requested.
    pub async fn cancelled_wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn run_callback(callback: &(dyn Fn() + Send + Sync)) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        callback();
    })) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("operation_id", &self.operation_id)
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .field("last_checkpoint", &self.last_checkpoint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new("run:select");
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
        assert_eq!(token.operation_id(), "run:select");
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new("op");
        token.cancel("First reason");
        token.cancel("Second reason");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_on_cancel_before_and_after_cancellation() {
        let token = CancellationToken::new("op");
        let counter = Arc::new(AtomicUsize::new(0));

        let before = counter.clone();
        token.on_cancel(move || {
            before.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel("test");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let after = counter.clone();
        token.on_cancel(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let token = CancellationToken::new("op");
        token.on_cancel(|| panic!("Intentional panic"));

        token.cancel("test");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_checkpoint_records_before_reporting_cancellation() {
        let token = CancellationToken::new("run:transform");

        assert!(token.checkpoint(1, Some(4), json!({"row": 10})).is_ok());
        token.cancel("user");
        let err = token.checkpoint(2, Some(4), json!({"row": 20})).unwrap_err();

        let cp = err.last_checkpoint.unwrap();
        assert_eq!(cp.completed_items, 2);
        assert_eq!(cp.marker, json!({"row": 20}));
        assert_eq!(cp.operation_id, "run:transform");
        assert_eq!(err.reason, "user");
        assert_eq!(token.last_checkpoint().unwrap().completed_items, 2);
    }

    #[tokio::test]
    async fn test_cancelled_wait_wakes_on_cancel() {
        let token = Arc::new(CancellationToken::new("op"));
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled_wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("stop");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
