//! The immutable stage graph.

use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::debug;

use super::{GateRule, GraphDefinition, StageDefinition, StageGraphBuilder};
use crate::errors::{ConfigurationError, NotFoundError};

/// Allowed stage names.
pub const STAGE_NAME_PATTERN: &str = "^[a-z][a-z0-9_-]*$";

/// Stage names of the default pipeline, in order.
pub const DEFAULT_PIPELINE: [&str; 8] = [
    "discover",
    "select",
    "context",
    "probe",
    "choose-tables",
    "preview",
    "transform",
    "export",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct StageNode {
    name: String,
    gate: Vec<GateRule>,
    /// Direct cascade targets, sorted by pipeline position.
    cascade: Vec<String>,
}

/// Ordering, forward gates and cascade targets of a pipeline.
///
/// Built once and never mutated; share it behind an `Arc` and replace the
/// whole value to reconfigure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraphConfig {
    nodes: Vec<StageNode>,
    index: HashMap<String, usize>,
}

impl StageGraphConfig {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> StageGraphBuilder {
        StageGraphBuilder::new()
    }

    /// Builds the default eight-stage pipeline.
    ///
    /// # Errors
    ///
    /// Never fails in practice; validation runs like any other graph.
    pub fn default_pipeline() -> Result<Self, ConfigurationError> {
        StageGraphBuilder::new()
            .stage(StageDefinition::new("discover").cascades_to("select"))
            .stage(
                StageDefinition::new("select")
                    .requires_locked("discover")
                    .cascades_to("context"),
            )
            .stage(
                StageDefinition::new("context")
                    .requires_locked("select")
                    .cascades_to("probe"),
            )
            .stage(
                StageDefinition::new("probe")
                    .requires_locked("context")
                    .cascades_to("choose-tables"),
            )
            .stage(
                StageDefinition::new("choose-tables")
                    .requires_completed("probe")
                    .cascades_to("preview")
                    .cascades_to("transform"),
            )
            .stage(StageDefinition::new("preview").requires_locked("choose-tables"))
            .stage(
                StageDefinition::new("transform")
                    .requires_locked("choose-tables")
                    .cascades_to("export"),
            )
            .stage(StageDefinition::new("export").requires_completed("transform"))
            .build()
    }

    /// Validates a definition and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] describing the first violation found.
    pub fn from_definition(definition: GraphDefinition) -> Result<Self, ConfigurationError> {
        if definition.stages.is_empty() {
            return Err(ConfigurationError::empty());
        }

        let name_pattern = Regex::new(STAGE_NAME_PATTERN)
            .map_err(|e| ConfigurationError::parse("stage name pattern", e))?;

        let mut index = HashMap::with_capacity(definition.stages.len());
        for (position, stage) in definition.stages.iter().enumerate() {
            if !name_pattern.is_match(&stage.name) {
                return Err(ConfigurationError::invalid_name(&stage.name, STAGE_NAME_PATTERN));
            }
            if index.insert(stage.name.clone(), position).is_some() {
                return Err(ConfigurationError::duplicate_stage(&stage.name));
            }
        }

        let mut nodes = Vec::with_capacity(definition.stages.len());
        for (position, stage) in definition.stages.into_iter().enumerate() {
            let gate = normalize_gate(&stage, &index)?;
            let cascade = normalize_cascade(&stage, position, &index)?;
            nodes.push(StageNode {
                name: stage.name,
                gate,
                cascade,
            });
        }

        let graph = Self { nodes, index };
        if let Some(cycle) = graph.find_gate_cycle() {
            return Err(ConfigurationError::cycle(cycle));
        }

        debug!(stages = graph.nodes.len(), "Stage graph validated");
        Ok(graph)
    }

    /// Parses and validates a TOML definition.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] on parse or validation failure.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let definition: GraphDefinition =
            toml::from_str(source).map_err(|e| ConfigurationError::parse("TOML", e))?;
        Self::from_definition(definition)
    }

    /// Parses and validates a JSON definition.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] on parse or validation failure.
    pub fn from_json_str(source: &str) -> Result<Self, ConfigurationError> {
        let definition: GraphDefinition =
            serde_json::from_str(source).map_err(|e| ConfigurationError::parse("JSON", e))?;
        Self::from_definition(definition)
    }

    /// Loads a definition file, choosing the format by extension.
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

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            _ => Err(ConfigurationError::parse(
                label,
                "unsupported extension (expected .toml or .json)",
            )),
        }
    }

    /// Converts back to a declarative definition.
    #[must_use]
    pub fn to_definition(&self) -> GraphDefinition {
        GraphDefinition {
            stages: self
                .nodes
                .iter()
                .map(|node| StageDefinition {
                    name: node.name.clone(),
                    gate: node.gate.clone(),
                    cascade: node.cascade.clone(),
                })
                .collect(),
        }
    }

    /// Returns the stage names in pipeline order.
    #[must_use]
    pub fn stages(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.name.as_str()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no stages. Validated graphs never do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the stage is part of the graph.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.index.contains_key(stage)
    }

    /// Returns the pipeline position of a stage.
    #[must_use]
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.index.get(stage).copied()
    }

    /// Returns the forward gate of a stage.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Stage`] for unknown stages.
    pub fn gate(&self, stage: &str) -> Result<&[GateRule], NotFoundError> {
        Ok(&self.node(stage)?.gate)
    }

    /// Returns the direct cascade targets of a stage, in pipeline order.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Stage`] for unknown stages.
    pub fn cascade_targets(&self, stage: &str) -> Result<&[String], NotFoundError> {
        Ok(&self.node(stage)?.cascade)
    }

    /// Returns every stage reachable through cascade rules, deduplicated and
    /// in pipeline order. The source stage itself is not included.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Stage`] for unknown stages.
    pub fn cascade_closure(&self, stage: &str) -> Result<Vec<String>, NotFoundError> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.cascade_targets(stage)?.iter().map(String::as_str).collect();

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                continue;
            }
            queue.extend(self.cascade_targets(next)?.iter().map(String::as_str));
        }

        let mut closure: Vec<String> = visited.into_iter().map(str::to_string).collect();
        closure.sort_by_key(|name| self.index.get(name).copied().unwrap_or(usize::MAX));
        Ok(closure)
    }

    fn node(&self, stage: &str) -> Result<&StageNode, NotFoundError> {
        self.index
            .get(stage)
            .map(|&position| &self.nodes[position])
            .ok_or_else(|| NotFoundError::Stage(stage.to_string()))
    }

    /// Depth-first search over gate edges, returning the first cycle found.
    fn find_gate_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node.name.as_str()) {
                if let Some(cycle) =
                    self.dfs_cycle(&node.name, &mut visited, &mut rec_stack, &mut path)
                {
                    return Some(cycle);
                }
            }
        }

        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        stage: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(stage);
        rec_stack.insert(stage);
        path.push(stage);

        if let Ok(node) = self.node(stage) {
            for rule in &node.gate {
                let dep = rule.stage.as_str();
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| (*n).to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(stage);
        None
    }
}

fn normalize_gate(
    stage: &StageDefinition,
    index: &HashMap<String, usize>,
) -> Result<Vec<GateRule>, ConfigurationError> {
    let mut rules: Vec<GateRule> = Vec::with_capacity(stage.gate.len());

    for rule in &stage.gate {
        if rule.stage == stage.name {
            return Err(ConfigurationError::self_reference(&stage.name));
        }
        if !index.contains_key(&rule.stage) {
            return Err(ConfigurationError::unknown_stage(&stage.name, &rule.stage));
        }
        match rules.iter().find(|existing| existing.stage == rule.stage) {
            Some(existing) if existing.requirement != rule.requirement => {
                return Err(ConfigurationError::conflicting_gate(&stage.name, &rule.stage));
            }
            Some(_) => {}
            None => rules.push(rule.clone()),
        }
    }

    Ok(rules)
}

fn normalize_cascade(
    stage: &StageDefinition,
    position: usize,
    index: &HashMap<String, usize>,
) -> Result<Vec<String>, ConfigurationError> {
    let mut targets: Vec<(usize, String)> = Vec::with_capacity(stage.cascade.len());

    for target in &stage.cascade {
        if *target == stage.name {
            return Err(ConfigurationError::self_reference(&stage.name));
        }
        let Some(&target_position) = index.get(target) else {
            return Err(ConfigurationError::unknown_stage(&stage.name, target));
        };
        if target_position <= position {
            return Err(ConfigurationError::backward_cascade(&stage.name, target));
        }
        if !targets.iter().any(|(_, existing)| existing == target) {
            targets.push((target_position, target.clone()));
        }
    }

    targets.sort_by_key(|(target_position, _)| *target_position);
    Ok(targets.into_iter().map(|(_, name)| name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Requirement;
    use pretty_assertions::assert_eq;

    fn default_graph() -> StageGraphConfig {
        StageGraphConfig::default_pipeline().unwrap()
    }

    #[test]
    fn test_default_pipeline_order() {
        let graph = default_graph();
        assert_eq!(graph.stages(), DEFAULT_PIPELINE.to_vec());
        assert_eq!(graph.len(), 8);
    }

    #[test]
    fn test_default_pipeline_gates() {
        let graph = default_graph();

        assert!(graph.gate("discover").unwrap().is_empty());
        assert_eq!(graph.gate("select").unwrap(), &[GateRule::locked("discover")]);
        assert_eq!(
            graph.gate("export").unwrap(),
            &[GateRule::completed("transform")]
        );
        assert_eq!(
            graph.gate("choose-tables").unwrap()[0].requirement,
            Requirement::Completed
        );
    }

    #[test]
    fn test_cascade_closure_of_select() {
        let graph = default_graph();
        let closure = graph.cascade_closure("select").unwrap();

        assert_eq!(
            closure,
            vec![
                "context",
                "probe",
                "choose-tables",
                "preview",
                "transform",
                "export"
            ]
        );
    }

    #[test]
    fn test_cascade_closure_deduplicates_diamonds() {
        let graph = StageGraphConfig::builder()
            .stage(StageDefinition::new("a").cascades_to("b").cascades_to("c"))
            .stage(StageDefinition::new("b").cascades_to("d"))
            .stage(StageDefinition::new("c").cascades_to("d"))
            .plain("d")
            .build()
            .unwrap();

        assert_eq!(graph.cascade_closure("a").unwrap(), vec!["b", "c", "d"]);
        assert!(graph.cascade_closure("d").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_stage_lookup() {
        let graph = default_graph();
        assert_eq!(
            graph.gate("report").unwrap_err(),
            NotFoundError::Stage("report".to_string())
        );
        assert!(!graph.contains("report"));
    }

    #[test]
    fn test_gate_cycle_rejected() {
        let err = StageGraphConfig::builder()
            .stage(StageDefinition::new("a").requires_locked("c"))
            .stage(StageDefinition::new("b").requires_locked("a"))
            .stage(StageDefinition::new("c").requires_locked("b"))
            .build()
            .unwrap_err();

        assert_eq!(err.info.code, "CONFIG-006-CYCLE");
        assert_eq!(err.stages.first(), err.stages.last());
    }

    #[test]
    fn test_backward_cascade_rejected() {
        let err = StageGraphConfig::builder()
            .plain("a")
            .stage(StageDefinition::new("b").cascades_to("a"))
            .build()
            .unwrap_err();

        assert_eq!(err.info.code, "CONFIG-007-BACKWARD");
    }

    #[test]
    fn test_self_reference_rejected() {
        let err = StageGraphConfig::builder()
            .stage(StageDefinition::new("a").requires_locked("a"))
            .build()
            .unwrap_err();

        assert_eq!(err.info.code, "CONFIG-005-SELF");
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let err = StageGraphConfig::builder()
            .stage(StageDefinition::new("a").cascades_to("missing"))
            .build()
            .unwrap_err();

        assert_eq!(err.info.code, "CONFIG-004-UNKNOWN");
    }

    #[test]
    fn test_duplicate_and_invalid_names_rejected() {
        let dup = StageGraphConfig::builder().plain("a").plain("a").build().unwrap_err();
        assert_eq!(dup.info.code, "CONFIG-003-DUPLICATE");

        let bad = StageGraphConfig::builder().plain("Not Valid").build().unwrap_err();
        assert_eq!(bad.info.code, "CONFIG-002-NAME");
    }

    #[test]
    fn test_conflicting_gate_rules_rejected() {
        let err = StageGraphConfig::builder()
            .plain("a")
            .stage(
                StageDefinition::new("b")
                    .requires_locked("a")
                    .requires_completed("a"),
            )
            .build()
            .unwrap_err();

        assert_eq!(err.info.code, "CONFIG-008-CONFLICT");
    }

    #[test]
    fn test_toml_and_json_round_trip_through_definition() {
        let graph = default_graph();
        let definition = graph.to_definition();

        let json = serde_json::to_string(&definition).unwrap();
        assert_eq!(StageGraphConfig::from_json_str(&json).unwrap(), graph);

        let toml_text = toml::to_string(&definition).unwrap();
        assert_eq!(StageGraphConfig::from_toml_str(&toml_text).unwrap(), graph);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.yaml");
        std::fs::write(&path, "stages: []").unwrap();

        let err = StageGraphConfig::load(&path).unwrap_err();
        assert_eq!(err.info.code, "CONFIG-009-PARSE");
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.toml");
        std::fs::write(
            &path,
            r#"
            [[stages]]
            name = "ingest"
            cascade = ["publish"]

            [[stages]]
            name = "publish"
            gate = [{ stage = "ingest", requirement = "completed" }]
            "#,
        )
        .unwrap();

        let graph = StageGraphConfig::load(&path).unwrap();
        assert_eq!(graph.stages(), vec!["ingest", "publish"]);
        assert_eq!(graph.gate("publish").unwrap(), &[GateRule::completed("ingest")]);
    }
}
