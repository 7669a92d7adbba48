//! Tracing subscriber setup and timing helpers.
//!
//! Priority for determining the filter:
//! 1. `STAGELOCK_LOG` environment variable (e.g. "info", "stagelock=debug")
//! 2. the configured [`LoggingSettings::filter`]

use anyhow::{anyhow, Result};
use std::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

use crate::settings::{LogFormat, LoggingSettings};

/// Environment variable overriding the configured log filter.
pub const LOG_ENV_VAR: &str = "STAGELOCK_LOG";

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV_VAR) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.filter)
            .map_err(|e| anyhow!("invalid log filter '{}': {e}", settings.filter))?,
    };

    let installed = match settings.format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
