//! Observability utilities.

mod telemetry;

pub use telemetry::{init_tracing, SpanTimer, LOG_ENV_VAR};
