//! Event sinks for stage lifecycle events.
//!
//! The transition engine emits one event per state change:
//! `stage.locked`, `stage.reused`, `stage.partial`, `stage.cancelled`,
//! `stage.unlocked` and `stage.cascade_unlocked`. The sink is injected into
//! the engine; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the engine.
pub mod types {
    /// A stage executed and was locked as completed.
    pub const STAGE_LOCKED: &str = "stage.locked";
    /// A stage was locked by reusing an existing artifact.
    pub const STAGE_REUSED: &str = "stage.reused";
    /// A stage executed but produced a partial result.
    pub const STAGE_PARTIAL: &str = "stage.partial";
    /// A stage execution was cancelled and locked as incomplete.
    pub const STAGE_CANCELLED: &str = "stage.cancelled";
    /// A stage was explicitly unlocked.
    pub const STAGE_UNLOCKED: &str = "stage.unlocked";
    /// A stage was unlocked by a cascade from an upstream stage.
    pub const STAGE_CASCADE_UNLOCKED: &str = "stage.cascade_unlocked";
}
