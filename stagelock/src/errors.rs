//! Error types for the stagelock engine.
//!
//! The taxonomy follows the transition contract:
//! - [`GateError`]: a forward-gate prerequisite is unmet (user-correctable, no mutation)
//! - [`NotFoundError`]: unknown run, stage or artifact (caller error)
//! - [`PersistenceError`]: a durable write failed (retryable, nothing committed)
//! - [`ConfigurationError`]: malformed stage graph or settings (fatal at startup)
//!
//! [`EngineError`] aggregates them for the transition engine and request facade.
//! Cancellation is not an error; it is a recorded, incomplete lock outcome.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::core::StagePhase;
use crate::graph::Requirement;

/// Structured diagnostics attached to an error.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "CONFIG-006-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Creates new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));

        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }

        map
    }
}

/// A forward-gate prerequisite is not satisfied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "cannot lock stage '{stage}': prerequisite '{prerequisite}' must be {requirement} but is {observed}"
)]
pub struct GateError {
    /// The stage whose lock was requested.
    pub stage: String,
    /// The unmet prerequisite stage.
    pub prerequisite: String,
    /// What the gate requires of the prerequisite.
    pub requirement: Requirement,
    /// What the prerequisite actually is.
    pub observed: StagePhase,
}

impl GateError {
    /// Creates a new gate error.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        prerequisite: impl Into<String>,
        requirement: Requirement,
        observed: StagePhase,
    ) -> Self {
        Self {
            stage: stage.into(),
            prerequisite: prerequisite.into(),
            requirement,
            observed,
        }
    }

    /// Returns true if the gate asked for completion rather than a mere lock.
    #[must_use]
    pub fn requires_completion(&self) -> bool {
        self.requirement == Requirement::Completed
    }

    /// Returns structured diagnostics for this error.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        let hint = if self.requires_completion() {
            format!(
                "Lock '{}' and let it run to completion before locking '{}'.",
                self.prerequisite, self.stage
            )
        } else {
            format!("Lock '{}' before locking '{}'.", self.prerequisite, self.stage)
        };

        ErrorInfo::new("GATE-001-UNMET", self.to_string())
            .with_fix_hint(hint)
            .with_context_entry("stage", self.stage.clone())
            .with_context_entry("prerequisite", self.prerequisite.clone())
            .with_context_entry("requirement", self.requirement.to_string())
            .with_context_entry("observed", self.observed.to_string())
    }
}

/// An addressed entity does not exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotFoundError {
    /// The run is unknown to the state store.
    #[error("run {0} not found")]
    Run(Uuid),

    /// The stage is not part of the configured pipeline.
    #[error("stage '{0}' is not part of the pipeline")]
    Stage(String),

    /// The artifact reference does not resolve.
    #[error("artifact '{0}' not found")]
    Artifact(String),
}

/// A durable write or read failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stage record violates the status invariants and was rejected.
    #[error("invalid status for stage '{stage}': {reason}")]
    InvalidRecord {
        /// The stage whose record was rejected.
        stage: String,
        /// Why the record is invalid.
        reason: String,
    },

    /// The backing store cannot accept writes.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    /// Creates an I/O error for a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// The stage graph or engine settings are malformed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Structured diagnostics.
    pub info: ErrorInfo,
}

impl ConfigurationError {
    /// Creates a configuration error with explicit diagnostics.
    #[must_use]
    pub fn new(message: impl Into<String>, info: ErrorInfo) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            info,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// The graph declares no stages.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(
            "Stage graph has no stages",
            ErrorInfo::new("CONFIG-001-EMPTY", "Cannot build an empty stage graph")
                .with_fix_hint("Declare at least one stage."),
        )
    }

    /// A stage name does not match the allowed pattern.
    #[must_use]
    pub fn invalid_name(name: &str, pattern: &str) -> Self {
        Self::new(
            format!("Invalid stage name '{name}'"),
            ErrorInfo::new("CONFIG-002-NAME", format!("Stage names must match {pattern}"))
                .with_context_entry("stage", name),
        )
        .with_stages(vec![name.to_string()])
    }

    /// A stage is declared twice.
    #[must_use]
    pub fn duplicate_stage(name: &str) -> Self {
        Self::new(
            format!("Stage '{name}' is declared more than once"),
            ErrorInfo::new("CONFIG-003-DUPLICATE", "Duplicate stage declaration")
                .with_fix_hint("Remove or rename one of the declarations."),
        )
        .with_stages(vec![name.to_string()])
    }

    /// A gate or cascade rule references an undeclared stage.
    #[must_use]
    pub fn unknown_stage(referrer: &str, name: &str) -> Self {
        Self::new(
            format!("Stage '{referrer}' references unknown stage '{name}'"),
            ErrorInfo::new("CONFIG-004-UNKNOWN", format!("Stage '{name}' not declared"))
                .with_fix_hint("Check for typos in gate and cascade rules."),
        )
        .with_stages(vec![referrer.to_string(), name.to_string()])
    }

    /// A stage gates or cascades on itself.
    #[must_use]
    pub fn self_reference(name: &str) -> Self {
        Self::new(
            format!("Stage '{name}' cannot reference itself"),
            ErrorInfo::new("CONFIG-005-SELF", "Self-referencing stage rule"),
        )
        .with_stages(vec![name.to_string()])
    }

    /// The gate relation contains a cycle.
    #[must_use]
    pub fn cycle(cycle_path: Vec<String>) -> Self {
        let rendered = cycle_path.join(" -> ");
        Self::new(
            format!("Cycle detected in stage gates: {rendered}"),
            ErrorInfo::new(
                "CONFIG-006-CYCLE",
                format!("Stage gates contain a cycle: {rendered}"),
            )
            .with_fix_hint("Remove one of the gate rules in the cycle to break it."),
        )
        .with_stages(cycle_path)
    }

    /// A cascade target does not come strictly after its source.
    #[must_use]
    pub fn backward_cascade(source: &str, target: &str) -> Self {
        Self::new(
            format!("Stage '{source}' cascades to '{target}', which does not come after it"),
            ErrorInfo::new("CONFIG-007-BACKWARD", "Cascade targets must be downstream stages")
                .with_fix_hint("Only list stages later in the pipeline as cascade targets."),
        )
        .with_stages(vec![source.to_string(), target.to_string()])
    }

    /// Two gate rules for the same prerequisite disagree.
    #[must_use]
    pub fn conflicting_gate(stage: &str, prerequisite: &str) -> Self {
        Self::new(
            format!("Stage '{stage}' declares conflicting gate rules for '{prerequisite}'"),
            ErrorInfo::new("CONFIG-008-CONFLICT", "Conflicting gate requirements"),
        )
        .with_stages(vec![stage.to_string(), prerequisite.to_string()])
    }

    /// A definition or settings document could not be parsed or read.
    #[must_use]
    pub fn parse(source: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        let source = source.into();
        Self::new(
            format!("Failed to load configuration from {source}: {detail}"),
            ErrorInfo::new("CONFIG-009-PARSE", "Unreadable configuration")
                .with_context_entry("source", source),
        )
    }

    /// A settings value is out of range.
    #[must_use]
    pub fn invalid_setting(key: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            format!("Invalid setting '{key}': {detail}"),
            ErrorInfo::new("CONFIG-010-SETTING", "Setting out of range")
                .with_context_entry("key", key),
        )
    }
}

/// Errors surfaced by the transition engine and request facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A forward gate rejected the lock.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// A run, stage or artifact does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The state or artifact store failed; nothing was committed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The engine was configured incorrectly.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Another execution of the same (run, stage) pair is in flight.
    #[error("stage '{stage}' of run {run_id} is already in progress")]
    AlreadyInProgress {
        /// The run.
        run_id: Uuid,
        /// The stage.
        stage: String,
    },

    /// A short stage id matched an artifact built from different inputs.
    #[error(
        "stage id {stage_id} for '{stage}' collides with an artifact built from different inputs"
    )]
    IdentityCollision {
        /// The stage.
        stage: String,
        /// The colliding short id.
        stage_id: String,
        /// Digest echoed by the stored artifact.
        stored_digest: String,
        /// Digest of the requested inputs.
        requested_digest: String,
    },

    /// An upstream unlock invalidated the execution before it committed.
    #[error("execution of stage '{stage}' in run {run_id} was superseded by an upstream unlock")]
    Superseded {
        /// The run.
        run_id: Uuid,
        /// The stage.
        stage: String,
    },

    /// No executor is registered for the stage.
    #[error("no executor registered for stage '{0}'")]
    NoExecutor(String),

    /// The stage executor failed without producing a result.
    #[error("executor for stage '{stage}' failed: {message}")]
    Execution {
        /// The stage.
        stage: String,
        /// Rendered failure chain.
        message: String,
    },
}

impl EngineError {
    /// Returns a stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Gate(_) => "GATE-001-UNMET",
            Self::NotFound(NotFoundError::Run(_)) => "RUN-404",
            Self::NotFound(NotFoundError::Stage(_)) => "STAGE-404",
            Self::NotFound(NotFoundError::Artifact(_)) => "ARTIFACT-404",
            Self::Persistence(_) => "STORE-500",
            Self::Configuration(_) => "CONFIG-000",
            Self::AlreadyInProgress { .. } => "STAGE-409-BUSY",
            Self::IdentityCollision { .. } => "STAGE-409-COLLISION",
            Self::Superseded { .. } => "STAGE-409-SUPERSEDED",
            Self::NoExecutor(_) => "STAGE-501-NO_EXECUTOR",
            Self::Execution { .. } => "STAGE-500-EXECUTION",
        }
    }

    /// Returns true if retrying the same request may succeed.
    ///
    /// Persistence failures commit nothing, and a busy stage frees up once the
    /// in-flight execution ends. Executor failures are left to the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_)
                | Self::AlreadyInProgress { .. }
                | Self::Superseded { .. }
                | Self::Execution { .. }
        )
    }

    /// Returns structured diagnostics for this error.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        match self {
            Self::Gate(err) => err.info(),
            Self::Configuration(err) => err.info.clone(),
            Self::AlreadyInProgress { run_id, stage } => {
                ErrorInfo::new(self.code(), self.to_string())
                    .with_fix_hint("Wait for the running execution or cancel it first.")
                    .with_context_entry("run_id", run_id.to_string())
                    .with_context_entry("stage", stage.clone())
            }
            Self::Superseded { run_id, stage } => ErrorInfo::new(self.code(), self.to_string())
                .with_fix_hint("Lock the upstream stages again, then retry.")
                .with_context_entry("run_id", run_id.to_string())
                .with_context_entry("stage", stage.clone()),
            Self::IdentityCollision {
                stage,
                stage_id,
                stored_digest,
                requested_digest,
            } => ErrorInfo::new(self.code(), self.to_string())
                .with_fix_hint("Increase the configured stage id length.")
                .with_context_entry("stage", stage.clone())
                .with_context_entry("stage_id", stage_id.clone())
                .with_context_entry("stored_digest", stored_digest.clone())
                .with_context_entry("requested_digest", requested_digest.clone()),
            _ => ErrorInfo::new(self.code(), self.to_string()),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = self.info().to_dict();
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        map
    }
}
