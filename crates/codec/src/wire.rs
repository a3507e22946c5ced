// SPDX-License-Identifier: MIT

use crate::error::CodecError;
use bp_core::{Event, EventId, EventType, Platform, ValidationError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// The flat `key -> string` wire form of an event (§6).
pub type WireFields = HashMap<String, String>;

fn field<'a>(fields: &'a WireFields, key: &'static str) -> Result<&'a str, ValidationError> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or(ValidationError::MissingField(key))
}

fn parse_json(fields: &WireFields, key: &'static str) -> Result<serde_json::Value, ValidationError> {
    let raw = field(fields, key)?;
    serde_json::from_str(raw).map_err(|source| ValidationError::MalformedJson {
        field: key,
        source: Arc::new(source),
    })
}

fn parse_timestamp(fields: &WireFields, key: &'static str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = field(fields, key)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| ValidationError::MalformedJson {
            field: key,
            source: Arc::new(serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                source,
            ))),
        })
}

/// Encode a canonical event into its wire form (§6). The codec hides the
/// JSON-in-string flattening of `payload` and `metadata` from callers.
pub fn encode(event: &Event) -> WireFields {
    let mut fields = WireFields::with_capacity(10);
    fields.insert("event_id".into(), event.event_id.as_str().to_string());
    fields.insert("enqueued_at".into(), event.enqueued_at.to_rfc3339());
    fields.insert("retry_count".into(), event.retry_count.to_string());
    fields.insert("platform".into(), event.platform.as_str().to_string());
    fields.insert(
        "external_session_id".into(),
        event.external_session_id.clone(),
    );
    fields.insert("hook_type".into(), event.hook_type.clone());
    fields.insert("event_type".into(), event.event_type.as_str().to_string());
    fields.insert("timestamp".into(), event.timestamp.to_rfc3339());
    // unwrap_or_default is safe: payload/metadata are always JSON values we
    // produced ourselves or already validated as serializable.
    fields.insert(
        "payload".into(),
        serde_json::to_string(&event.payload).unwrap_or_default(),
    );
    fields.insert(
        "metadata".into(),
        serde_json::to_string(&event.metadata).unwrap_or_default(),
    );
    fields
}

/// Decode a wire-form event back into the canonical envelope, validating
/// field presence and the closed `event_type` enum (§4.1). Unknown
/// `event_type` values and malformed JSON both surface as dead-lettered
/// `schema_violation`.
pub fn decode(fields: &WireFields) -> Result<Event, CodecError> {
    let event_id = EventId::new(field(fields, "event_id")?);
    let enqueued_at = parse_timestamp(fields, "enqueued_at")?;
    let retry_count = field(fields, "retry_count")?
        .parse::<u32>()
        .unwrap_or(0);
    let platform = Platform::from_str(field(fields, "platform")?)?;
    let external_session_id = field(fields, "external_session_id")?.to_string();
    let hook_type = fields.get("hook_type").cloned().unwrap_or_default();
    let event_type = EventType::from_str(field(fields, "event_type")?)?;
    let timestamp = parse_timestamp(fields, "timestamp")?;
    let payload = parse_json(fields, "payload")?;
    let metadata = parse_json(fields, "metadata")?;

    Ok(Event {
        event_id,
        enqueued_at,
        retry_count,
        platform,
        external_session_id,
        hook_type,
        event_type,
        timestamp,
        payload,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_core::EventBuilder;

    fn sample() -> Event {
        EventBuilder::new("e-1", Platform::Cursor, EventType::ToolUse, "s-1", "ws-1")
            .hook_type("PostToolUse")
            .payload(serde_json::json!({"tool_name": "Read"}))
            .build()
    }

    #[test]
    fn round_trips_through_wire_form() {
        let event = sample();
        let wire = encode(&event);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_rejects_unknown_event_type() {
        let mut wire = encode(&sample());
        wire.insert("event_type".into(), "page_view".into());
        let err = decode(&wire).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Validation(ValidationError::UnknownEventType(_))
        ));
    }

    #[test]
    fn decode_rejects_missing_field() {
        let mut wire = encode(&sample());
        wire.remove("external_session_id");
        let err = decode(&wire).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Validation(ValidationError::MissingField("external_session_id"))
        ));
    }

    #[test]
    fn decode_rejects_malformed_payload_json() {
        let mut wire = encode(&sample());
        wire.insert("payload".into(), "{not json".into());
        let err = decode(&wire).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Validation(ValidationError::MalformedJson { field: "payload", .. })
        ));
    }
}
