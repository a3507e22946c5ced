// SPDX-License-Identifier: MIT

//! Extracts the denormalized scalar fields and platform-specific
//! correlation keys a raw trace row carries (§3), from the event's
//! `payload`/`metadata`. Producers populate these keys by convention;
//! absence is not an error — the columns are nullable.

use bp_core::{Event, Platform};
use serde_json::Value;

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

#[derive(Debug, Default, Clone)]
pub struct Denormalized {
    pub generation_uuid: Option<String>,
    pub composer_id: Option<String>,
    pub bubble_id: Option<String>,
    pub tool_name: Option<String>,
    pub model: Option<String>,
    pub duration_ms: Option<i64>,
    pub tokens_used: Option<i64>,
    pub lines_added: Option<i64>,
    pub lines_removed: Option<i64>,
}

pub fn extract(event: &Event) -> Denormalized {
    let payload = &event.payload;
    let mut out = Denormalized {
        duration_ms: int_field(payload, "duration_ms"),
        tokens_used: int_field(payload, "tokens_used"),
        lines_added: int_field(payload, "lines_added"),
        lines_removed: int_field(payload, "lines_removed"),
        ..Default::default()
    };

    match event.platform {
        Platform::Cursor => {
            out.generation_uuid = str_field(payload, "generation_uuid");
            out.composer_id = str_field(payload, "composer_id");
            out.bubble_id = str_field(payload, "bubble_id");
        }
        Platform::ClaudeCode => {
            out.tool_name = str_field(payload, "tool_name");
            out.model = str_field(payload, "model");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_core::{EventBuilder, EventType};

    #[test]
    fn extracts_claude_correlation_keys() {
        let event = EventBuilder::new("e-1", Platform::ClaudeCode, EventType::ToolUse, "s-1", "ws-1")
            .payload(serde_json::json!({"tool_name": "Read", "duration_ms": 120}))
            .build();
        let d = extract(&event);
        assert_eq!(d.tool_name.as_deref(), Some("Read"));
        assert_eq!(d.duration_ms, Some(120));
        assert!(d.generation_uuid.is_none());
    }

    #[test]
    fn extracts_cursor_correlation_keys() {
        let event = EventBuilder::new("e-1", Platform::Cursor, EventType::ToolUse, "s-1", "ws-1")
            .payload(serde_json::json!({"generation_uuid": "g-1"}))
            .build();
        let d = extract(&event);
        assert_eq!(d.generation_uuid.as_deref(), Some("g-1"));
        assert!(d.tool_name.is_none());
    }
}
