//! Stage transition engine.
//!
//! This module provides:
//! - The executor boundary ([`StageExecutor`], [`ExecutionContext`])
//! - Forward-gate validation
//! - [`TransitionEngine`], which locks, reuses, unlocks and cancels stages

mod executor;
mod gate;
mod transition;


pub use executor::{ExecutionContext, ExecutionOutcome, FnExecutor, Interrupted, StageExecutor};
pub use transition::{LockDisposition, LockOutcome, TransitionEngine, UnlockOutcome};
