use std::sync::{Arc, Mutex};

use tracing::info;

/// Emitted when a processor starts handling an outcome.
pub const PROCESSING_OUTCOME: &str = "PROCESSING_OUTCOME";
/// Emitted once a processor has handed a derived event to the publisher.
pub const OUTCOME_SENT: &str = "OUTCOME_SENT";
/// Emitted once a property listing has been handed to the publisher.
pub const CESPG_OUTCOME_SENT: &str = "CESPG_OUTCOME_SENT";

/// A lifecycle event about a case, with free-form metadata for dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub case_id: String,
    pub event_type: &'static str,
    pub metadata: Vec<(&'static str, String)>,
}

impl GatewayEvent {
    pub fn new(case_id: impl Into<String>, event_type: &'static str) -> Self {
        Self {
            case_id: case_id.into(),
            event_type,
            metadata: Vec::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.metadata.push((key, value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Receiver of lifecycle events. Triggering an event never fails the pipeline.
pub trait EventManager: Send + Sync {
    fn trigger(&self, event: GatewayEvent);
}

/// Logs every lifecycle event and counts them by type.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventManager;

impl EventManager for TracingEventManager {
    fn trigger(&self, event: GatewayEvent) {
        let metadata = event
            .metadata
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(", ");

        info!(
            case_id = %event.case_id,
            event_type = event.event_type,
            "gateway event: {}",
            metadata
        );

        metrics::counter!("outcome_gateway_events_total", "event_type" => event.event_type)
            .increment(1);
    }
}

/// Keeps every lifecycle event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventManager {
    events: Arc<Mutex<Vec<GatewayEvent>>>,
}

impl RecordingEventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn of_type(&self, event_type: &str) -> Vec<GatewayEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}

impl EventManager for RecordingEventManager {
    fn trigger(&self, event: GatewayEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_event_manager_keeps_order() {
        let manager = RecordingEventManager::new();

        manager.trigger(GatewayEvent::new("a", PROCESSING_OUTCOME).with("processor", "LINKED_QID"));
        manager.trigger(GatewayEvent::new("a", OUTCOME_SENT).with("routing key", "event.uac.update"));

        let events = manager.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, PROCESSING_OUTCOME);
        assert_eq!(events[0].get("processor"), Some("LINKED_QID"));
        assert_eq!(manager.of_type(OUTCOME_SENT).len(), 1);
        assert_eq!(events[1].get("missing"), None);
    }
}
