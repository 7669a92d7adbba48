//! Core domain model types for stagelock.
//!
//! This module contains the records the engine reads and writes:
//! - Run and per-stage status, with the lock/completion invariants
//! - Checkpoints describing progress of a long-running execution
//! - Artifact references and records
//! - Lifecycle events

mod artifact;
mod event;
mod run;
mod status;

use chrono::{DateTime, Utc};

pub use artifact::{ArtifactDraft, ArtifactRecord, ArtifactRef};
pub use event::StageEvent;
pub use run::Run;
pub use status::{Checkpoint, LockState, StagePhase, StageStatus};

/// UTC timestamp used across all records.
pub type Timestamp = DateTime<Utc>;
