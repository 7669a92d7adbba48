//! Cooperative cancellation and checkpointing.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation with progress reports
//! - CheckpointManager tracking in-flight operations and their checkpoints
//! - OperationGuard ending an operation on every exit path

mod manager;
mod token;

pub use manager::{CheckpointManager, OperationGuard};
pub use token::{CancelCallback, CancellationToken, Cancelled};
