//! Engine settings.
//!
//! Settings are read from TOML or JSON. Every field has a default, so an
//! empty file yields an in-memory engine over the default pipeline:
//!
//! ```toml
//! stage_id_length = 16
//! state_dir = "/var/lib/stagelock/state"
//! artifact_dir = "/var/lib/stagelock/artifacts"
//! graph_file = "pipeline.toml"
//!
//! [logging]
//! filter = "stagelock=debug"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::artifacts::{ArtifactStore, FileArtifactStore, InMemoryArtifactStore};
use crate::engine::TransitionEngine;
use crate::errors::{ConfigurationError, EngineError};
use crate::events::LoggingEventSink;
use crate::graph::StageGraphConfig;
use crate::identity::{IdentityConfig, DEFAULT_STAGE_ID_LENGTH};
use crate::store::{FileRunStore, InMemoryRunStore, RunStateStore};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, overridden by `STAGELOCK_LOG`.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Settings for building a [`TransitionEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Length of stage ids in hex characters.
    pub stage_id_length: usize,
    /// Directory for run records; in-memory when unset.
    pub state_dir: Option<PathBuf>,
    /// Directory for artifacts; in-memory when unset.
    pub artifact_dir: Option<PathBuf>,
    /// Stage graph definition file; the default pipeline when unset.
    pub graph_file: Option<PathBuf>,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stage_id_length: DEFAULT_STAGE_ID_LENGTH,
            state_dir: None,
            artifact_dir: None,
            graph_file: None,
            logging: LoggingSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Parses and validates TOML settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] on parse or validation failure.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let settings: Self =
            toml::from_str(source).map_err(|e| ConfigurationError::parse("TOML", e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses and validates JSON settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] on parse or validation failure.
    pub fn from_json_str(source: &str) -> Result<Self, ConfigurationError> {
        let settings: Self =
            serde_json::from_str(source).map_err(|e| ConfigurationError::parse("JSON", e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads a settings file, choosing the format by extension.
    ///
    /// A relative `graph_file` is resolved against the settings file's
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the file cannot be read, has an
    /// unsupported extension, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigurationError::parse(&label, e))?;

        let mut settings = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents)?,
            Some("json") => Self::from_json_str(&contents)?,
            _ => {
                return Err(ConfigurationError::parse(
                    label,
                    "unsupported extension (expected .toml or .json)",
                ))
            }
        };

        if let (Some(graph_file), Some(base)) = (&settings.graph_file, path.parent()) {
            if graph_file.is_relative() {
                settings.graph_file = Some(base.join(graph_file));
            }
        }
        Ok(settings)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.identity()?;
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigurationError::invalid_setting(
                "logging.filter",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Returns the identity settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the stage id length is out of range.
    pub fn identity(&self) -> Result<IdentityConfig, ConfigurationError> {
        IdentityConfig::new(self.stage_id_length)
    }

    /// Loads the configured stage graph, or the default pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the graph file is invalid.
    pub fn graph(&self) -> Result<StageGraphConfig, ConfigurationError> {
        match &self.graph_file {
            Some(path) => StageGraphConfig::load(path),
            None => StageGraphConfig::default_pipeline(),
        }
    }

    /// Builds an engine with file-backed stores where directories are set
    /// and in-memory stores otherwise. Events go to the log.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for invalid settings or graphs
    /// and [`EngineError::Persistence`] if a store directory cannot be
    /// created.
    pub fn build_engine(&self) -> Result<TransitionEngine, EngineError> {
        let identity = self.identity()?;
        let graph = self.graph()?;

        let store: Arc<dyn RunStateStore> = match &self.state_dir {
            Some(dir) => Arc::new(FileRunStore::open(dir)?),
            None => Arc::new(InMemoryRunStore::new()),
        };
        let artifacts: Arc<dyn ArtifactStore> = match &self.artifact_dir {
            Some(dir) => Arc::new(FileArtifactStore::open(dir)?),
            None => Arc::new(InMemoryArtifactStore::new()),
        };

        info!(
            stages = graph.len(),
            stage_id_length = identity.stage_id_length,
            durable_state = self.state_dir.is_some(),
            durable_artifacts = self.artifact_dir.is_some(),
            "Engine configured"
        );

        Ok(TransitionEngine::new(Arc::new(graph), store, artifacts)
            .with_identity(identity)
            .with_event_sink(Arc::new(LoggingEventSink::default())))
    }
}
