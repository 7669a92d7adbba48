//! # Stagelock
//!
//! A resumable stage orchestration engine.
//!
//! A run moves through a fixed, ordered set of stages. Each stage is locked
//! (executed, or satisfied from a previous result) or unlocked. Stagelock
//! provides:
//!
//! - **Forward gates**: a stage may only lock once its prerequisites are
//!   locked, or locked and completed
//! - **Deterministic identity**: a stage id hashed from the stage's effective
//!   inputs, so identical inputs reuse the stored artifact instead of running
//!   again
//! - **Cascading unlock**: unlocking a stage unlocks everything downstream of
//!   it in one atomic commit, without deleting artifacts
//! - **Checkpointed cancellation**: long executions report progress and stop
//!   cooperatively, and a later lock with the same inputs resumes from the
//!   last checkpoint
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagelock::prelude::*;
//!
//! let engine = EngineSettings::default().build_engine()?;
//! let run = engine.create_run().await?;
//!
//! let discover = FnExecutor::new("discover", |ctx: ExecutionContext| async move {
//!     Ok::<_, Interrupted>(ExecutionOutcome::completed(serde_json::json!({"files": []})))
//! });
//! let inputs = PipelineInputs::Discover { root: "/data".into(), patterns: vec![] };
//! let outcome = engine.lock_stage(run.run_id, &inputs.into(), &discover).await?;
//! assert!(outcome.is_completed());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod cancellation;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod graph;
pub mod identity;
pub mod observability;
pub mod service;
pub mod settings;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::{ArtifactStore, FileArtifactStore, InMemoryArtifactStore};
    pub use crate::cancellation::{CancellationToken, Cancelled, CheckpointManager};
    pub use crate::core::{
        ArtifactRef, Checkpoint, LockState, Run, StageEvent, StagePhase, StageStatus,
    };
    pub use crate::engine::{
        ExecutionContext, ExecutionOutcome, FnExecutor, Interrupted, LockDisposition,
        LockOutcome, StageExecutor, TransitionEngine, UnlockOutcome,
    };
    pub use crate::errors::{
        ConfigurationError, EngineError, ErrorInfo, GateError, NotFoundError, PersistenceError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{GateRule, Requirement, StageDefinition, StageGraphConfig};
    pub use crate::identity::{compute_stage_id, PipelineInputs, StageId, StageInputs};
    pub use crate::observability::init_tracing;
    pub use crate::service::{ErrorReport, StageService};
    pub use crate::settings::{EngineSettings, LogFormat, LoggingSettings};
    pub use crate::store::{FileRunStore, InMemoryRunStore, RunStateStore, RunUpdate};
}
