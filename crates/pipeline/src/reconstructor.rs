// SPDX-License-Identifier: MIT

//! Conversation reconstructor (C8, §4.8): owns conversation/turn/code-change
//! state and the `external_session_id -> cursor_sessions.id` mapping.
//!
//! Idempotent on `event_id` throughout — replaying an already-applied event
//! is a no-op, which is what gives at-least-once CDC delivery an
//! at-most-once *effect* here (§4.8, §8).

use bp_core::{Event, EventType, Platform};
use bp_store::{NewCodeChange, NewTurn, Store};
use sha2::{Digest, Sha256};

fn content_hash(value: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

fn str_field(event: &Event, key: &str) -> Option<String> {
    event.payload.get(key).and_then(serde_json::Value::as_str).map(str::to_string)
}

fn int_field(event: &Event, key: &str) -> Option<i64> {
    event.payload.get(key).and_then(serde_json::Value::as_i64)
}

/// Applies one CDC-dispatched event's conversation-side effects. Stateless
/// apart from the store — safe to share across worker tasks.
pub struct Reconstructor {
    store: std::sync::Arc<Store>,
}

impl Reconstructor {
    pub fn new(store: std::sync::Arc<Store>) -> Self {
        Self { store }
    }

    /// Whether this worker type handles `event_type` at all — messages it
    /// doesn't handle are acknowledged as no-op by the caller (§4.7).
    pub fn handles(event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::SessionStart
                | EventType::SessionEnd
                | EventType::UserPrompt
                | EventType::AssistantResponse
                | EventType::ToolUse
                | EventType::CodeChange
                | EventType::AcceptanceDecision
        )
    }

    pub fn handle(&self, event: &Event) -> Result<(), crate::error::PipelineError> {
        match event.event_type {
            EventType::SessionStart => self.handle_session_start(event),
            EventType::SessionEnd => self.handle_session_end(event),
            EventType::UserPrompt => self.handle_turn(event, "user_prompt"),
            EventType::AssistantResponse => self.handle_turn(event, "assistant_response"),
            EventType::ToolUse => self.handle_turn(event, "tool_use"),
            EventType::CodeChange => self.handle_code_change(event),
            EventType::AcceptanceDecision => self.handle_acceptance_decision(event),
            // completion/performance/database_trace carry no conversation-side
            // effect; the metrics worker owns them (§4.7 dispatch by type).
            _ => Ok(()),
        }
    }

    fn workspace_hash(&self, event: &Event) -> String {
        event.workspace_hash().map(|w| w.as_str().to_string()).unwrap_or_default()
    }

    fn handle_session_start(&self, event: &Event) -> Result<(), crate::error::PipelineError> {
        if event.platform != Platform::Cursor {
            return Ok(());
        }
        let workspace_path = str_field(event, "workspace_path");
        self.store.upsert_cursor_session(
            &event.external_session_id,
            &self.workspace_hash(event),
            workspace_path.as_deref(),
            &event.timestamp.to_rfc3339(),
        )?;
        Ok(())
    }

    fn handle_session_end(&self, event: &Event) -> Result<(), crate::error::PipelineError> {
        if event.platform != Platform::Cursor {
            return Ok(());
        }
        self.store
            .end_cursor_session(&event.external_session_id, &event.timestamp.to_rfc3339())?;
        Ok(())
    }

    /// Resolves or creates the conversation this event belongs to, per the
    /// `(external_id, platform)` uniqueness invariant of §3. The external
    /// conversation id is conventionally the producer's session id, unless
    /// a distinct `conversation_id` payload key says otherwise — this lets
    /// one Cursor session host multiple sequential conversations (§8
    /// scenario 6).
    fn conversation_external_id(&self, event: &Event) -> String {
        str_field(event, "conversation_id").unwrap_or_else(|| event.external_session_id.clone())
    }

    fn ensure_conversation(&self, event: &Event) -> Result<String, crate::error::PipelineError> {
        let external_id = self.conversation_external_id(event);
        let session_id = if event.platform == Platform::Cursor {
            Some(self.store.upsert_cursor_session(
                &event.external_session_id,
                &self.workspace_hash(event),
                None,
                &event.timestamp.to_rfc3339(),
            )?)
        } else {
            None
        };
        let id = self.store.ensure_conversation(
            &external_id,
            event.platform.as_str(),
            &self.workspace_hash(event),
            session_id.as_deref(),
            &event.timestamp.to_rfc3339(),
        )?;
        Ok(id)
    }

    fn handle_turn(&self, event: &Event, turn_type: &'static str) -> Result<(), crate::error::PipelineError> {
        let event_id = event.event_id.as_str();
        if self.store.turn_recorded_for_event(event_id)? {
            return Ok(());
        }

        let conversation_id = self.ensure_conversation(event)?;
        let hash = content_hash(&event.payload);
        let tools_called = str_field(event, "tool_name").into_iter().collect::<Vec<_>>();
        let timestamp = event.timestamp.to_rfc3339();

        // Turn numbers are assigned in arrival order (§4.8): an event whose
        // producer timestamp is older than the latest already-recorded turn
        // is, by definition, arriving late.
        let out_of_order = self
            .store
            .max_turn_timestamp(&conversation_id)?
            .is_some_and(|latest| timestamp < latest);

        let turn = NewTurn {
            conversation_id,
            timestamp,
            turn_type,
            content_hash: hash,
            tokens_used: int_field(event, "tokens_used"),
            latency_ms: int_field(event, "latency_ms").or_else(|| int_field(event, "duration_ms")),
            tools_called,
            source_event_id: event_id.to_string(),
        };
        self.store.append_turn(&turn, out_of_order)?;
        Ok(())
    }

    fn handle_code_change(&self, event: &Event) -> Result<(), crate::error::PipelineError> {
        let event_id = event.event_id.as_str();
        if self.store.code_change_recorded_for_event(event_id)? {
            return Ok(());
        }

        let conversation_id = self.ensure_conversation(event)?;
        // A code_change always follows the turn that prompted it; if none
        // was recorded (producer omitted an explicit turn event), the
        // change still needs *a* turn foreign key, so one is synthesized.
        let turn_id = self.store.append_turn(
            &NewTurn {
                conversation_id: conversation_id.clone(),
                timestamp: event.timestamp.to_rfc3339(),
                turn_type: "tool_use",
                content_hash: content_hash(&event.payload),
                tokens_used: None,
                latency_ms: None,
                tools_called: Vec::new(),
                source_event_id: format!("{event_id}:turn"),
            },
            false,
        )?;

        let operation = str_field(event, "operation").unwrap_or_else(|| "edit".to_string());
        let operation: &'static str = match operation.as_str() {
            "create" => "create",
            "delete" => "delete",
            "read" => "read",
            _ => "edit",
        };

        self.store.insert_code_change(&NewCodeChange {
            conversation_id,
            turn_id,
            timestamp: event.timestamp.to_rfc3339(),
            file_extension: str_field(event, "file_extension"),
            operation,
            lines_added: int_field(event, "lines_added").unwrap_or(0),
            lines_removed: int_field(event, "lines_removed").unwrap_or(0),
            source_event_id: event_id.to_string(),
        })?;
        Ok(())
    }

    fn handle_acceptance_decision(&self, event: &Event) -> Result<(), crate::error::PipelineError> {
        let event_id = event.event_id.as_str();
        if self.store.acceptance_decision_recorded_for_event(event_id)? {
            return Ok(());
        }

        let Some(change_event_id) = str_field(event, "change_event_id") else {
            return Ok(());
        };
        let Some(change_id) = self.store.code_change_id_for_event(&change_event_id)? else {
            return Ok(());
        };

        let accepted = event
            .payload
            .get("accepted")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let delay = int_field(event, "acceptance_delay_ms").unwrap_or(0);
        self.store
            .record_acceptance_decision(&change_id, accepted, delay, event_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_core::EventBuilder;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn t(offset_secs: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    #[test]
    fn single_claude_session_with_one_tool_call() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let reconstructor = Reconstructor::new(Arc::clone(&store));

        let session_start = EventBuilder::new("e-1", Platform::ClaudeCode, EventType::SessionStart, "s-aaaa", "ws-1")
            .timestamp(t(0))
            .build();
        let user_prompt = EventBuilder::new("e-2", Platform::ClaudeCode, EventType::UserPrompt, "s-aaaa", "ws-1")
            .timestamp(t(1))
            .payload(serde_json::json!({"content_hash": "h1"}))
            .build();
        let tool_use = EventBuilder::new("e-3", Platform::ClaudeCode, EventType::ToolUse, "s-aaaa", "ws-1")
            .timestamp(t(2))
            .payload(serde_json::json!({"tool_name": "Read", "duration_ms": 120}))
            .build();
        let assistant_response =
            EventBuilder::new("e-4", Platform::ClaudeCode, EventType::AssistantResponse, "s-aaaa", "ws-1")
                .timestamp(t(3))
                .payload(serde_json::json!({"tokens_used": 250}))
                .build();

        for event in [&session_start, &user_prompt, &tool_use, &assistant_response] {
            reconstructor.handle(event).unwrap();
        }

        let conn = store.conn.lock();
        let turn_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM conversation_turns", [], |r| r.get(0))
            .unwrap();
        assert_eq!(turn_count, 3);
        let interaction_count: i64 = conn
            .query_row("SELECT interaction_count FROM conversations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(interaction_count, 3);
    }

    #[test]
    fn replaying_the_same_event_is_a_no_op() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let reconstructor = Reconstructor::new(Arc::clone(&store));
        let event = EventBuilder::new("e-42", Platform::ClaudeCode, EventType::UserPrompt, "s-1", "ws-1")
            .timestamp(t(0))
            .build();

        reconstructor.handle(&event).unwrap();
        reconstructor.handle(&event).unwrap();
        reconstructor.handle(&event).unwrap();

        let conn = store.conn.lock();
        let turn_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM conversation_turns", [], |r| r.get(0))
            .unwrap();
        assert_eq!(turn_count, 1);
    }

    #[test]
    fn cursor_session_hosts_two_sequential_conversations() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let reconstructor = Reconstructor::new(Arc::clone(&store));

        let session_start = EventBuilder::new("e-1", Platform::Cursor, EventType::SessionStart, "c-ws-1", "ws-1")
            .timestamp(t(0))
            .build();
        reconstructor.handle(&session_start).unwrap();

        let conv_x = EventBuilder::new("e-2", Platform::Cursor, EventType::UserPrompt, "c-ws-1", "ws-1")
            .timestamp(t(1))
            .payload(serde_json::json!({"conversation_id": "conv-x"}))
            .build();
        let conv_y = EventBuilder::new("e-3", Platform::Cursor, EventType::UserPrompt, "c-ws-1", "ws-1")
            .timestamp(t(2))
            .payload(serde_json::json!({"conversation_id": "conv-y"}))
            .build();
        reconstructor.handle(&conv_x).unwrap();
        reconstructor.handle(&conv_y).unwrap();

        let conn = store.conn.lock();
        let session_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cursor_sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(session_count, 1);
        let conv_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM conversations WHERE session_id IS NOT NULL", [], |r| r.get(0))
            .unwrap();
        assert_eq!(conv_count, 2);
    }
}
