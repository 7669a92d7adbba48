//! Declarative stage definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a forward gate requires of a prerequisite stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// The prerequisite must be locked; a partial or cancelled attempt is enough.
    #[default]
    Locked,
    /// The prerequisite must be locked and completed.
    Completed,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "locked"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A single forward-gate prerequisite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GateRule {
    /// The prerequisite stage.
    pub stage: String,
    /// What the prerequisite must satisfy.
    #[serde(default)]
    pub requirement: Requirement,
}

impl GateRule {
    /// Requires the prerequisite to be locked.
    #[must_use]
    pub fn locked(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            requirement: Requirement::Locked,
        }
    }

    /// Requires the prerequisite to be completed.
    #[must_use]
    pub fn completed(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            requirement: Requirement::Completed,
        }
    }
}

/// Definition of one stage: its gate and cascade targets.
///
/// The position of a stage is its index in the enclosing [`GraphDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// The unique stage name.
    pub name: String,
    /// Prerequisites that must hold before the stage may be locked.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gate: Vec<GateRule>,
    /// Stages that must also unlock when this stage unlocks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cascade: Vec<String>,
}

impl StageDefinition {
    /// Creates a stage with no gate and no cascade.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gate: Vec::new(),
            cascade: Vec::new(),
        }
    }

    /// Adds a gate rule requiring `stage` to be locked.
    #[must_use]
    pub fn requires_locked(mut self, stage: impl Into<String>) -> Self {
        self.gate.push(GateRule::locked(stage));
        self
    }

    /// Adds a gate rule requiring `stage` to be completed.
    #[must_use]
    pub fn requires_completed(mut self, stage: impl Into<String>) -> Self {
        self.gate.push(GateRule::completed(stage));
        self
    }

    /// Adds a cascade-unlock target.
    #[must_use]
    pub fn cascades_to(mut self, stage: impl Into<String>) -> Self {
        self.cascade.push(stage.into());
        self
    }
}

/// A whole stage graph in pipeline order, as written in a definition file.
///
/// ```toml
/// [[stages]]
/// name = "discover"
/// cascade = ["select"]
///
/// [[stages]]
/// name = "select"
/// gate = [{ stage = "discover", requirement = "locked" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GraphDefinition {
    /// Stages in canonical pipeline order.
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_display() {
        assert_eq!(Requirement::Locked.to_string(), "locked");
        assert_eq!(Requirement::Completed.to_string(), "completed");
    }

    #[test]
    fn test_definition_from_toml_defaults_requirement() {
        let def: GraphDefinition = toml::from_str(
            r#"
            [[stages]]
            name = "discover"
            cascade = ["select"]

            [[stages]]
            name = "select"
            gate = [{ stage = "discover" }]
            "#,
        )
        .unwrap();

        assert_eq!(def.stages.len(), 2);
        assert_eq!(def.stages[1].gate, vec![GateRule::locked("discover")]);
        assert_eq!(def.stages[0].cascade, vec!["select".to_string()]);
    }

    #[test]
    fn test_stage_definition_builder_methods() {
        let def = StageDefinition::new("export")
            .requires_completed("transform")
            .cascades_to("report");

        assert_eq!(def.gate[0].requirement, Requirement::Completed);
        assert_eq!(def.cascade, vec!["report".to_string()]);
    }
}
