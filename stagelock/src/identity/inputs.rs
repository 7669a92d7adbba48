//! Stage inputs and the effective-input envelope that gets hashed.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stage-specific inputs for one lock request.
///
/// This is the envelope the engine consumes; the payload shape is owned by
/// the stage executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInputs {
    /// The stage being locked.
    pub stage: String,
    /// Input values relevant to this stage only.
    #[serde(default)]
    pub values: IndexMap<String, Value>,
}

impl StageInputs {
    /// Creates an input set with no values.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            values: IndexMap::new(),
        }
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Gets a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Typed inputs for the stages of the default pipeline.
///
/// Each variant is the input contract of one stage; only these fields feed
/// that stage's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum PipelineInputs {
    /// Scan a source root for candidate files.
    Discover {
        /// Directory to scan.
        root: String,
        /// Glob patterns to include.
        #[serde(default)]
        patterns: Vec<String>,
    },
    /// Pick a subset of the discovered files.
    Select {
        /// Selected file paths.
        files: Vec<String>,
    },
    /// Attach a connection profile.
    Context {
        /// Profile name.
        profile: String,
        /// Optional target within the profile.
        #[serde(default)]
        target: Option<String>,
    },
    /// Check that the configured target is reachable.
    Probe {
        /// Probe timeout.
        timeout_seconds: u64,
    },
    /// Choose the tables to process.
    ChooseTables {
        /// Table names.
        tables: Vec<String>,
    },
    /// Sample rows for preview.
    Preview {
        /// Number of rows.
        rows: u32,
    },
    /// Parse and reshape the selected tables.
    Transform {
        /// Output format.
        format: String,
        /// Format-specific options.
        #[serde(default)]
        options: BTreeMap<String, Value>,
    },
    /// Write the transformed output.
    Export {
        /// Destination path or URI.
        destination: String,
        /// Output format.
        format: String,
    },
}

impl PipelineInputs {
    /// Returns the stage this input set belongs to.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Discover { .. } => "discover",
            Self::Select { .. } => "select",
            Self::Context { .. } => "context",
            Self::Probe { .. } => "probe",
            Self::ChooseTables { .. } => "choose-tables",
            Self::Preview { .. } => "preview",
            Self::Transform { .. } => "transform",
            Self::Export { .. } => "export",
        }
    }

    /// Converts to the generic envelope.
    #[must_use]
    pub fn to_stage_inputs(&self) -> StageInputs {
        let values = match serde_json::to_value(self).unwrap_or_default() {
            Value::Object(mut map) => {
                map.remove("stage");
                map.into_iter().collect()
            }
            _ => IndexMap::new(),
        };

        StageInputs {
            stage: self.stage().to_string(),
            values,
        }
    }
}

impl From<PipelineInputs> for StageInputs {
    fn from(inputs: PipelineInputs) -> Self {
        inputs.to_stage_inputs()
    }
}

/// Everything that determines a stage's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveInputs {
    /// The owning run.
    pub run_id: Uuid,
    /// The stage.
    pub stage: String,
    /// Stage-specific values.
    pub inputs: IndexMap<String, Value>,
}

impl EffectiveInputs {
    /// Builds the effective inputs of a lock request.
    #[must_use]
    pub fn for_stage(run_id: Uuid, inputs: &StageInputs) -> Self {
        Self {
            run_id,
            stage: inputs.stage.clone(),
            inputs: inputs.values.clone(),
        }
    }

    /// Returns the JSON value that gets canonicalized and hashed.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "run_id": self.run_id.to_string(),
            "stage": self.stage,
            "inputs": self.inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pipeline_inputs_stage_names() {
        let inputs = PipelineInputs::ChooseTables {
            tables: vec!["orders".to_string()],
        };
        assert_eq!(inputs.stage(), "choose-tables");

        let envelope = inputs.to_stage_inputs();
        assert_eq!(envelope.stage, "choose-tables");
        assert_eq!(envelope.get("tables"), Some(&json!(["orders"])));
        assert!(envelope.get("stage").is_none());
    }

    #[test]
    fn test_pipeline_inputs_tagged_deserialization() {
        let inputs: PipelineInputs =
            serde_json::from_value(json!({"stage": "probe", "timeout_seconds": 5})).unwrap();
        assert_eq!(inputs, PipelineInputs::Probe { timeout_seconds: 5 });

        let transform: PipelineInputs =
            serde_json::from_value(json!({"stage": "transform", "format": "parquet"})).unwrap();
        assert_eq!(transform.stage(), "transform");
    }

    #[test]
    fn test_effective_inputs_value_shape() {
        let run_id = Uuid::nil();
        let inputs = StageInputs::new("preview").with("rows", json!(20));
        let effective = EffectiveInputs::for_stage(run_id, &inputs);

        assert_eq!(
            effective.to_value(),
            json!({
                "run_id": run_id.to_string(),
                "stage": "preview",
                "inputs": {"rows": 20},
            })
        );
    }
}
