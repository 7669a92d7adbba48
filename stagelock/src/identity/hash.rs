//! Canonical hashing of effective inputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use super::EffectiveInputs;
use crate::errors::ConfigurationError;

/// Default number of hex characters kept in a stage id.
pub const DEFAULT_STAGE_ID_LENGTH: usize = 16;
/// Shortest allowed stage id.
pub const MIN_STAGE_ID_LENGTH: usize = 8;
/// Longest allowed stage id (the full SHA-256 digest).
pub const MAX_STAGE_ID_LENGTH: usize = 64;

/// Short, readable content hash of a stage's effective inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Wraps an existing id, e.g. one read back from storage.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity hashing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Hex characters kept from the digest.
    #[serde(default = "default_stage_id_length")]
    pub stage_id_length: usize,
}

fn default_stage_id_length() -> usize {
    DEFAULT_STAGE_ID_LENGTH
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            stage_id_length: DEFAULT_STAGE_ID_LENGTH,
        }
    }
}

impl IdentityConfig {
    /// Creates a config with a validated stage id length.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the length is outside
    /// `MIN_STAGE_ID_LENGTH..=MAX_STAGE_ID_LENGTH`.
    pub fn new(stage_id_length: usize) -> Result<Self, ConfigurationError> {
        let config = Self { stage_id_length };
        config.validate()?;
        Ok(config)
    }

    /// Checks the stage id length range.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the length is out of range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if (MIN_STAGE_ID_LENGTH..=MAX_STAGE_ID_LENGTH).contains(&self.stage_id_length) {
            Ok(())
        } else {
            Err(ConfigurationError::invalid_setting(
                "stage_id_length",
                format!(
                    "{} is outside {MIN_STAGE_ID_LENGTH}..={MAX_STAGE_ID_LENGTH}",
                    self.stage_id_length
                ),
            ))
        }
    }
}

/// Serializes a value as compact JSON with every object's keys sorted,
/// recursively.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&sorted(value)).unwrap_or_default()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, inner)| (key.clone(), sorted(inner)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Returns the full hex SHA-256 digest of the canonical inputs.
#[must_use]
pub fn input_digest(inputs: &EffectiveInputs) -> String {
    let json = canonical_json(&inputs.to_value());
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Computes the stage id using the default length.
#[must_use]
pub fn compute_stage_id(inputs: &EffectiveInputs) -> StageId {
    compute_stage_id_with(inputs, &IdentityConfig::default())
}

/// Computes the stage id with the configured length.
///
/// Out-of-range lengths are clamped.
#[must_use]
pub fn compute_stage_id_with(inputs: &EffectiveInputs, config: &IdentityConfig) -> StageId {
    let length = config
        .stage_id_length
        .clamp(MIN_STAGE_ID_LENGTH, MAX_STAGE_ID_LENGTH);
    let mut digest = input_digest(inputs);
    digest.truncate(length);
    StageId(digest)
}
