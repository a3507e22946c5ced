// SPDX-License-Identifier: MIT

//! Canonical event envelope (§3).
//!
//! This is the in-memory representation the codec decodes the wire form
//! into and the fast path inserts into the trace store. The wire form
//! itself (a flat `HashMap<String, String>`) lives in `bp-codec`, which
//! depends on this crate.

use crate::error::ValidationError;
use crate::event_type::EventType;
use crate::id::{EventId, WorkspaceHash};
use crate::platform::Platform;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default tolerance between producer `timestamp` and stream-assigned
/// `enqueued_at` before skew is logged (§3).
pub const DEFAULT_SKEW_TOLERANCE: Duration = Duration::minutes(5);

/// Default maximum serialized payload size before an event is dead-lettered
/// with reason `payload_too_large` (§3).
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// The canonical event envelope (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub platform: Platform,
    pub external_session_id: String,
    pub hook_type: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Arbitrary JSON object; opaque to everything except the producer.
    pub payload: Value,
    /// JSON object; must contain at least `workspace_hash`.
    pub metadata: Value,
}

impl Event {
    /// The workspace hash carried in `metadata`, if present.
    pub fn workspace_hash(&self) -> Option<WorkspaceHash> {
        self.metadata
            .get("workspace_hash")
            .and_then(Value::as_str)
            .map(WorkspaceHash::new)
    }

    /// Whether `timestamp` falls within `tolerance` of `enqueued_at`.
    ///
    /// Skew outside tolerance is not a validation failure (§3: "outside
    /// tolerance is logged, still accepted") — callers log and continue.
    pub fn within_skew(&self, tolerance: Duration) -> bool {
        self.timestamp <= self.enqueued_at + tolerance
    }

    /// Validates field presence and payload size (§3, §4.1). Unknown
    /// `event_type` values never reach this point — the codec rejects them
    /// while decoding the wire form.
    pub fn validate(&self, max_payload_bytes: usize) -> Result<(), ValidationError> {
        if self.event_id.as_str().is_empty() {
            return Err(ValidationError::MissingField("event_id"));
        }
        if self.external_session_id.is_empty() {
            return Err(ValidationError::MissingField("external_session_id"));
        }
        if !self.payload.is_object() {
            return Err(ValidationError::MissingField("payload"));
        }
        if !self.metadata.is_object() {
            return Err(ValidationError::MissingField("metadata"));
        }
        if self.workspace_hash().is_none() {
            return Err(ValidationError::MissingField("metadata.workspace_hash"));
        }

        let payload_len = serde_json::to_vec(&self.payload)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX);
        if payload_len > max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                limit: max_payload_bytes,
                actual: payload_len,
            });
        }

        Ok(())
    }
}

/// Builder for constructing `Event`s in tests and in the Cursor monitor,
/// which synthesizes events rather than decoding them off the wire.
pub struct EventBuilder {
    event_id: EventId,
    enqueued_at: DateTime<Utc>,
    retry_count: u32,
    platform: Platform,
    external_session_id: String,
    hook_type: String,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    payload: Value,
    metadata: Value,
}

impl EventBuilder {
    pub fn new(
        event_id: impl Into<EventId>,
        platform: Platform,
        event_type: EventType,
        external_session_id: impl Into<String>,
        workspace_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id: event_id.into(),
            enqueued_at: now,
            retry_count: 0,
            platform,
            external_session_id: external_session_id.into(),
            hook_type: String::new(),
            event_type,
            timestamp: now,
            payload: Value::Object(Default::default()),
            metadata: serde_json::json!({ "workspace_hash": workspace_hash.into() }),
        }
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = at;
        self
    }

    pub fn enqueued_at(mut self, at: DateTime<Utc>) -> Self {
        self.enqueued_at = at;
        self
    }

    pub fn hook_type(mut self, hook_type: impl Into<String>) -> Self {
        self.hook_type = hook_type.into();
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn metadata_field(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> Event {
        Event {
            event_id: self.event_id,
            enqueued_at: self.enqueued_at,
            retry_count: self.retry_count,
            platform: self.platform,
            external_session_id: self.external_session_id,
            hook_type: self.hook_type,
            event_type: self.event_type,
            timestamp: self.timestamp,
            payload: self.payload,
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        EventBuilder::new("e-1", Platform::ClaudeCode, EventType::UserPrompt, "s-1", "ws-1").build()
    }

    #[test]
    fn validates_well_formed_event() {
        assert!(sample().validate(MAX_PAYLOAD_BYTES).is_ok());
    }

    #[test]
    fn rejects_missing_workspace_hash() {
        let mut event = sample();
        event.metadata = serde_json::json!({});
        assert_eq!(
            event.validate(MAX_PAYLOAD_BYTES),
            Err(ValidationError::MissingField("metadata.workspace_hash"))
        );
    }

    #[test]
    fn rejects_oversize_payload() {
        let mut event = sample();
        event.payload = serde_json::json!({ "blob": "x".repeat(128) });
        let err = event.validate(64).unwrap_err();
        assert_eq!(err.dead_letter_reason(), "payload_too_large");
    }

    #[test]
    fn skew_outside_tolerance_is_detected_but_not_rejected() {
        let mut event = sample();
        event.enqueued_at = Utc::now();
        event.timestamp = event.enqueued_at + Duration::minutes(10);
        assert!(!event.within_skew(DEFAULT_SKEW_TOLERANCE));
        assert!(event.validate(MAX_PAYLOAD_BYTES).is_ok());
    }
}
