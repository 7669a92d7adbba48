//! Stage graph configuration.
//!
//! This module provides:
//! - Declarative stage definitions loadable from TOML or JSON
//! - A builder that validates gates and cascades at construction time
//! - The immutable [`StageGraphConfig`] consumed by the transition engine

mod builder;
mod config;
mod definition;

pub use builder::StageGraphBuilder;
pub use config::{StageGraphConfig, DEFAULT_PIPELINE, STAGE_NAME_PATTERN};
pub use definition::{GateRule, GraphDefinition, Requirement, StageDefinition};
