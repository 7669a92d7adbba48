//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

use crate::core::StageEvent;

/// Receives stage lifecycle events from the transition engine.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &StageEvent);

    /// Emits an event without waiting.
    ///
    /// Must never panic or block; failures are logged and suppressed.
    fn try_emit(&self, event: &StageEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &StageEvent) {}

    fn try_emit(&self, _event: &StageEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &StageEvent) {
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.event_type,
                run_id = %event.run_id,
                stage = %event.stage,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                event_type = %event.event_type,
                run_id = %event.run_id,
                stage = %event.stage,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &StageEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &StageEvent) {
        self.log_event(event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<StageEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<StageEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of exactly the given type.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<StageEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &StageEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &StageEvent) {
        self.events.write().push(event.clone());
    }
}
