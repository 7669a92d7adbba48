//! Lifecycle event emitted by the transition engine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::Timestamp;

/// A stage lifecycle event.
///
/// Events are used for observability and can be consumed by
/// event sinks for logging, monitoring, or analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    /// The event type (e.g., "stage.locked", "stage.unlocked").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred.
    pub timestamp: Timestamp,

    /// The run the event belongs to.
    pub run_id: Uuid,

    /// The stage the event is about.
    pub stage: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl StageEvent {
    /// Creates a new stage event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, run_id: Uuid, stage: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            run_id,
            stage: stage.into(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Converts the event to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.event_type));
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp.to_rfc3339()));
        map.insert("run_id".to_string(), serde_json::json!(self.run_id.to_string()));
        map.insert("stage".to_string(), serde_json::json!(self.stage));

        if !self.data.is_empty() {
            let data_map: serde_json::Map<String, serde_json::Value> =
                self.data.clone().into_iter().collect();
            map.insert("data".to_string(), serde_json::Value::Object(data_map));
        }

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_to_dict() {
        let event = StageEvent::new("stage.locked", Uuid::nil(), "select")
            .add_data("stage_id", serde_json::json!("abc"));
        let dict = event.to_dict();

        assert_eq!(dict.get("type").unwrap(), "stage.locked");
        assert_eq!(dict.get("stage").unwrap(), "select");
        assert!(dict.contains_key("data"));
    }

    #[test]
    fn test_event_without_data_omits_key() {
        let event = StageEvent::new("stage.unlocked", Uuid::nil(), "select");
        assert!(!event.to_dict().contains_key("data"));
    }
}
