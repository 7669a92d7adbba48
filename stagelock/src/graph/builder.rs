//! Stage graph builder with validation.

use super::{GraphDefinition, StageDefinition, StageGraphConfig};
use crate::errors::ConfigurationError;

/// Builder for creating validated stage graphs.
///
/// Stages are added in pipeline order. Validation is deferred to
/// [`StageGraphBuilder::build`] so gate and cascade rules may name stages
/// declared later.
#[derive(Debug, Clone, Default)]
pub struct StageGraphBuilder {
    stages: Vec<StageDefinition>,
}

impl StageGraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage definition.
    #[must_use]
    pub fn stage(mut self, definition: StageDefinition) -> Self {
        self.stages.push(definition);
        self
    }

    /// Appends a stage with no gate and no cascade.
    #[must_use]
    pub fn plain(self, name: impl Into<String>) -> Self {
        self.stage(StageDefinition::new(name))
    }

    /// Returns the number of stages declared so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the immutable graph.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the graph is empty, names are
    /// invalid or duplicated, a rule references an unknown stage, the gate
    /// relation has a cycle, or a cascade points backwards.
    pub fn build(self) -> Result<StageGraphConfig, ConfigurationError> {
        StageGraphConfig::from_definition(GraphDefinition {
            stages: self.stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = StageGraphBuilder::new();
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_builder_forward_reference_in_cascade() {
        let graph = StageGraphBuilder::new()
            .stage(StageDefinition::new("a").cascades_to("b"))
            .stage(StageDefinition::new("b").requires_locked("a"))
            .build()
            .unwrap();

        assert_eq!(graph.stages(), vec!["a", "b"]);
    }

    #[test]
    fn test_builder_empty_build() {
        let err = StageGraphBuilder::new().build().unwrap_err();
        assert_eq!(err.info.code, "CONFIG-001-EMPTY");
    }
}
