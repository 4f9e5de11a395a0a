//! Event emission abstraction.
//!
//! Scan progress is published through an [`EventSink`] so that a host
//! (HTTP server, notification service, test) can observe it without the
//! core depending on any transport.

use std::sync::Arc;

use serde::Serialize;

use crate::models::{ScanCounts, ScanOutcome};

/// Emitted when a scan of a root begins.
pub const EVENT_SCAN_STARTED: &str = "scan:started";
/// Emitted after each album's transaction commits.
pub const EVENT_ALBUM_PROCESSED: &str = "scan:album-processed";
/// Emitted with the final counts once a scan ends, whatever its outcome.
pub const EVENT_SCAN_COMPLETED: &str = "scan:completed";

/// Trait for emitting events.
pub trait EventSink: Send + Sync {
    /// Emit an event with the given name and JSON payload.
    fn emit(&self, event_name: &str, payload_json: &str);
}

/// Extension trait for EventSink that provides typed emit functionality.
pub trait EventSinkExt {
    /// Emit an event with a typed payload that will be serialized to JSON.
    fn emit_typed<T: Serialize>(&self, event_name: &str, payload: &T);
}

impl<S: EventSink + ?Sized> EventSinkExt for S {
    fn emit_typed<T: Serialize>(&self, event_name: &str, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(json) => self.emit(event_name, &json),
            Err(e) => {
                tracing::error!("Failed to serialize event payload: {}", e);
            }
        }
    }
}

/// Shared reference to an EventSink implementation.
pub type SharedEventSink = Arc<dyn EventSink>;

/// No-op event sink for testing or when events are not needed.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event_name: &str, _payload_json: &str) {}
}

/// Logging event sink for debugging purposes.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event_name: &str, payload_json: &str) {
        tracing::debug!(event = event_name, payload = payload_json, "Event emitted");
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStartedPayload {
    pub scan_id: String,
    pub root_id: i64,
    pub root_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumProcessedPayload {
    pub scan_id: String,
    pub root_id: i64,
    pub album_id: i64,
    pub album_path: String,
    pub media_created: usize,
    pub media_updated: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCompletedPayload {
    pub scan_id: String,
    pub root_id: i64,
    pub outcome: ScanOutcome,
    pub counts: ScanCounts,
    pub failure_count: usize,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::EventSink;
    use std::sync::Mutex;

    /// Sink that keeps every event for later assertions.
    #[derive(Default)]
    pub struct RecordingEventSink {
        pub events: Mutex<Vec<(String, String)>>,
    }

    impl RecordingEventSink {
        pub fn names(&self) -> Vec<String> {
            self.events
                .lock()
                .map(|e| e.iter().map(|(n, _)| n.clone()).collect())
                .unwrap_or_default()
        }
    }

    impl EventSink for RecordingEventSink {
        fn emit(&self, event_name: &str, payload_json: &str) {
            if let Ok(mut events) = self.events.lock() {
                events.push((event_name.to_string(), payload_json.to_string()));
            }
        }
    }
}
