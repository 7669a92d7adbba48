//! Serializable error reports.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::errors::EngineError;

/// Structured form of an [`EngineError`] for callers outside the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
    /// Suggested fix, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Additional context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl From<&EngineError> for ErrorReport {
    fn from(err: &EngineError) -> Self {
        let info = err.info();
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            fix_hint: info.fix_hint,
            context: info.context,
        }
    }
}

impl From<EngineError> for ErrorReport {
    fn from(err: EngineError) -> Self {
        Self::from(&err)
    }
}

/// Renders a service result as a JSON reply envelope.
///
/// Success is `{"ok": true, "value": ...}`, failure is
/// `{"ok": false, "error": {...}}`.
pub fn to_reply<T: Serialize>(result: &Result<T, EngineError>) -> Value {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => json!({ "ok": true, "value": value }),
            Err(e) => json!({
                "ok": false,
                "error": ErrorReport {
                    code: "REPLY-500".to_string(),
                    message: format!("failed to serialize reply: {e}"),
                    retryable: false,
                    fix_hint: None,
                    context: BTreeMap::new(),
                },
            }),
        },
        Err(err) => json!({ "ok": false, "error": ErrorReport::from(err) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StagePhase;
    use crate::errors::GateError;
    use crate::graph::Requirement;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_gate_error_report() {
        let err: EngineError =
            GateError::new("export", "transform", Requirement::Completed, StagePhase::LockedIncomplete)
                .into();
        let report = ErrorReport::from(&err);

        assert_eq!(report.code, "GATE-001-UNMET");
        assert!(!report.retryable);
        assert!(report.fix_hint.is_some());
        assert_eq!(report.context.get("prerequisite").map(String::as_str), Some("transform"));
    }

    #[test]
    fn test_reply_envelope() {
        let ok: Result<u32, EngineError> = Ok(3);
        assert_eq!(to_reply(&ok), json!({"ok": true, "value": 3}));

        let err: Result<u32, EngineError> = Err(EngineError::NoExecutor("probe".to_string()));
        let reply = to_reply(&err);
        assert_eq!(reply["ok"], json!(false));
        assert_eq!(reply["error"]["code"], json!("STAGE-501-NO_EXECUTOR"));
        assert_eq!(reply["error"]["retryable"], json!(false));
        assert!(reply["error"].get("context").is_none());
    }
}
