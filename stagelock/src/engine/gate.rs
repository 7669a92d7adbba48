//! Forward-gate validation.

use crate::core::{Run, StagePhase, StageStatus};
use crate::errors::{GateError, NotFoundError};
use crate::graph::StageGraphConfig;

/// Errors from gate validation.
#[derive(Debug)]
pub(crate) enum GateCheck {
    /// The stage is not in the graph.
    Unknown(NotFoundError),
    /// A prerequisite is unmet.
    Unmet(GateError),
}

impl From<GateCheck> for crate::errors::EngineError {
    fn from(check: GateCheck) -> Self {
        match check {
            GateCheck::Unknown(e) => e.into(),
            GateCheck::Unmet(e) => e.into(),
        }
    }
}

/// Checks every gate rule of `stage` against `run`, in declaration order.
///
/// Returns the first unmet rule. A prerequisite missing from the run record
/// counts as unlocked.
pub(crate) fn check_gate(
    graph: &StageGraphConfig,
    run: &Run,
    stage: &str,
) -> Result<(), GateCheck> {
    let rules = graph.gate(stage).map_err(GateCheck::Unknown)?;

    for rule in rules {
        let status = run.stage(&rule.stage);
        if status.is_some_and(|s| s.satisfies(rule.requirement)) {
            continue;
        }
        let observed = status.map_or(StagePhase::Unlocked, StageStatus::phase);
        return Err(GateCheck::Unmet(GateError::new(
            stage,
            rule.stage.clone(),
            rule.requirement,
            observed,
        )));
    }

    Ok(())
}
