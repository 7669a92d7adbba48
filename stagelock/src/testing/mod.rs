//! Testing utilities for stagelock engines.
//!
//! This module provides:
//! - Mock executors with call recording, checkpoints and pause points
//! - A harness wiring an engine to in-memory stores
//! - Sample inputs for the default pipeline

mod fixtures;
mod mocks;

pub use fixtures::{init_test_tracing, sample_inputs, TestHarness};
pub use mocks::{CheckpointingExecutor, FailingExecutor, PartialExecutor, RecordingExecutor};
