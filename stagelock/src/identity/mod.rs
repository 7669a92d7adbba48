//! Deterministic stage identity.
//!
//! A stage id is a truncated SHA-256 of the canonical JSON form of a stage's
//! effective inputs: the run id, the stage name and the stage-specific inputs.
//! Identical inputs always hash to the same id, across processes and machines.

mod hash;
mod inputs;

pub use hash::{
    canonical_json, compute_stage_id, compute_stage_id_with, input_digest, IdentityConfig,
    StageId, DEFAULT_STAGE_ID_LENGTH, MAX_STAGE_ID_LENGTH, MIN_STAGE_ID_LENGTH,
};
pub use inputs::{EffectiveInputs, PipelineInputs, StageInputs};
