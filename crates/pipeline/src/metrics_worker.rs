// SPDX-License-Identifier: MIT

//! Metrics worker (C7, §4.7 worker type `metrics`): extracts the metric
//! points a CDC-dispatched event carries and records them to the metrics
//! store under the category retentions of §3.

use bp_core::{Event, EventType};
use bp_store::Store;
use std::sync::Arc;

fn ts_secs(event: &Event) -> i64 {
    event.enqueued_at.timestamp()
}

fn int_field(event: &Event, key: &str) -> Option<i64> {
    event.payload.get(key).and_then(serde_json::Value::as_i64)
}

/// Applies one CDC-dispatched event's metrics-side effects.
pub struct MetricsWorker {
    store: Arc<Store>,
}

impl MetricsWorker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Whether this worker type handles `event_type` at all — messages it
    /// doesn't handle are acknowledged as no-op by the caller (§4.7).
    pub fn handles(event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::ToolUse
                | EventType::Completion
                | EventType::Performance
                | EventType::AssistantResponse
                | EventType::CodeChange
        )
    }

    pub fn handle(&self, event: &Event) -> Result<(), crate::error::PipelineError> {
        let ts = ts_secs(event);
        self.store.metrics_add("realtime", "events_per_sec", ts, 1.0)?;

        if let Some(duration_ms) = int_field(event, "duration_ms") {
            self.store.metrics_add("tools", "duration_ms", ts, duration_ms as f64)?;
            if let Some(tool_name) = event.payload.get("tool_name").and_then(serde_json::Value::as_str) {
                self.store
                    .metrics_add("tools", &format!("duration_ms.{tool_name}"), ts, duration_ms as f64)?;
            }
        }
        if let Some(tokens) = int_field(event, "tokens_used") {
            self.store.metrics_add("session", "tokens_used", ts, tokens as f64)?;
        }
        if let Some(lines_added) = int_field(event, "lines_added") {
            self.store.metrics_add("session", "lines_added", ts, lines_added as f64)?;
        }
        if let Some(lines_removed) = int_field(event, "lines_removed") {
            self.store.metrics_add("session", "lines_removed", ts, lines_removed as f64)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_core::{EventBuilder, Platform};

    #[test]
    fn records_tool_duration_and_realtime_counter() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let worker = MetricsWorker::new(Arc::clone(&store));
        let event = EventBuilder::new("e-1", Platform::ClaudeCode, EventType::ToolUse, "s-1", "ws-1")
            .payload(serde_json::json!({"tool_name": "Read", "duration_ms": 42}))
            .build();

        worker.handle(&event).unwrap();

        let ts = event.enqueued_at.timestamp();
        let points = store.metrics_range("tools", "duration_ms", ts, ts).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 42.0);

        let realtime = store.metrics_range("realtime", "events_per_sec", ts, ts).unwrap();
        assert_eq!(realtime.len(), 1);
    }

    #[test]
    fn ignores_event_types_it_does_not_handle() {
        assert!(!MetricsWorker::handles(EventType::SessionStart));
        assert!(MetricsWorker::handles(EventType::ToolUse));
    }
}
