//! End-to-end behavioral specifications for the blueplane ingest pipeline.
//!
//! Each test drives real crate APIs (no binary spawning) across a
//! workspace-scoped temp store/stream dir and checks one of the durability,
//! idempotency, ordering, or isolation properties from the design.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bp_codec::{decode, encode};
use bp_core::{Event, EventBuilder, EventType, Platform};
use bp_store::{NewCodeChange, NewRawTrace, Store};
use bp_stream::{StreamClient, CDC_STREAM, EVENTS_STREAM};
use std::sync::Arc;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn sample_event(id: &str) -> Event {
    EventBuilder::new(id, Platform::ClaudeCode, EventType::UserPrompt, "session-1", "ws-1")
        .hook_type("UserPromptSubmit")
        .payload(serde_json::json!({ "prompt": "hello" }))
        .build()
}

fn raw_trace(event: &Event) -> NewRawTrace {
    NewRawTrace {
        ingested_at: event.enqueued_at.to_rfc3339(),
        event_id: event.event_id.as_str().to_string(),
        external_session_id: event.external_session_id.clone(),
        event_type: event.event_type.as_str().to_string(),
        timestamp: event.timestamp.to_rfc3339(),
        workspace_hash: event.workspace_hash().unwrap().as_str().to_string(),
        generation_uuid: None,
        composer_id: None,
        bubble_id: None,
        tool_name: None,
        model: None,
        duration_ms: None,
        tokens_used: None,
        lines_added: None,
        lines_removed: None,
        event_data: bp_codec::compress(&serde_json::to_vec(&event).unwrap()).unwrap(),
    }
}

#[test]
fn codec_round_trips_an_event_through_its_wire_form() {
    let event = sample_event("evt-round-trip");
    let wire = encode(&event);
    let decoded = decode(&wire).unwrap();
    assert_eq!(decoded, event);
}

#[test]
fn codec_rejects_a_wire_form_missing_a_required_field() {
    let mut wire = encode(&sample_event("evt-missing"));
    wire.remove("event_id");
    assert!(decode(&wire).is_err());
}

#[test]
fn stream_append_assigns_strictly_monotonic_sequence_ids() {
    let dir = tempfile::tempdir().unwrap();
    let streams = StreamClient::open(dir.path()).unwrap();
    let stream = streams.stream(EVENTS_STREAM).unwrap();

    let mut seqs = Vec::new();
    for i in 0..5 {
        let event = sample_event(&format!("evt-{i}"));
        seqs.push(stream.append(encode(&event)).unwrap());
    }

    assert!(seqs.windows(2).all(|pair| pair[1] > pair[0]));
    assert_eq!(stream.write_seq(), *seqs.last().unwrap());
}

#[test]
fn batch_insert_is_idempotent_under_duplicate_event_ids() {
    let store = Store::open_in_memory().unwrap();
    let event = sample_event("evt-dup");
    let row = raw_trace(&event);

    let first = store.batch_insert_traces(Platform::ClaudeCode, &[row.clone()]).unwrap();
    let second = store.batch_insert_traces(Platform::ClaudeCode, &[row]).unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0, "re-inserting the same event_id must not create a second row");
    assert_eq!(store.max_sequence(Platform::ClaudeCode).unwrap(), 1);
}

#[test]
fn raw_traces_are_isolated_per_platform_table() {
    let store = Store::open_in_memory().unwrap();
    let claude_event = sample_event("evt-claude");
    let cursor_event =
        EventBuilder::new("evt-cursor", Platform::Cursor, EventType::DatabaseTrace, "session-2", "ws-1").build();

    store
        .batch_insert_traces(Platform::ClaudeCode, &[raw_trace(&claude_event)])
        .unwrap();
    store
        .batch_insert_traces(Platform::Cursor, &[raw_trace(&cursor_event)])
        .unwrap();

    assert_eq!(store.max_sequence(Platform::ClaudeCode).unwrap(), 1);
    assert_eq!(store.max_sequence(Platform::Cursor).unwrap(), 1);
    assert!(store
        .sequence_for_event_id(Platform::ClaudeCode, "evt-cursor")
        .unwrap()
        .is_none());
}

#[test]
fn acceptance_decisions_are_recorded_at_most_once_per_source_event() {
    let store = Store::open_in_memory().unwrap();
    let conversation_id = store
        .ensure_conversation("session-3", "cursor", "ws-1", None, &now_rfc3339())
        .unwrap();
    let change_id = store
        .insert_code_change(&NewCodeChange {
            conversation_id: conversation_id.clone(),
            turn_id: String::new(),
            timestamp: now_rfc3339(),
            file_extension: Some("rs".to_string()),
            operation: "edit",
            lines_added: 3,
            lines_removed: 1,
            source_event_id: "evt-change-1".to_string(),
        })
        .unwrap();

    assert!(!store.acceptance_decision_recorded_for_event("evt-accept-1").unwrap());
    store
        .record_acceptance_decision(&change_id, true, 1500, "evt-accept-1")
        .unwrap();
    assert!(store.acceptance_decision_recorded_for_event("evt-accept-1").unwrap());

    // Replaying the same source event must not insert a second decision row.
    let err = store.record_acceptance_decision(&change_id, true, 1500, "evt-accept-1");
    assert!(err.is_err(), "applied_acceptance_decisions has a unique constraint on source_event_id");
}

#[test]
fn queue_depth_reflects_unacked_cdc_entries_and_drains_on_ack() {
    let dir = tempfile::tempdir().unwrap();
    let streams = StreamClient::open(dir.path()).unwrap();
    let stream = streams.stream(CDC_STREAM).unwrap();
    let group = "workers.metrics";

    let mut fields = bp_stream::Fields::new();
    fields.insert("platform".into(), "claude_code".into());
    fields.insert("sequence".into(), "1".into());
    let id = stream.append(fields).unwrap();

    assert_eq!(stream.queue_depth(group), 0, "nothing claimed yet, depth tracks pending claims not raw entries");
    let entries = stream.entries_after(0).unwrap();
    assert_eq!(entries.len(), 1);

    stream.ack(group, &[id]).unwrap();
    assert_eq!(stream.queue_depth(group), 0);
}

#[test]
fn cdc_backfill_reconciles_traces_inserted_without_a_published_cdc_pointer() {
    let dir = tempfile::tempdir().unwrap();
    let streams = StreamClient::open(dir.path()).unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());

    let event = sample_event("evt-backfill");
    store
        .batch_insert_traces(Platform::ClaudeCode, &[raw_trace(&event)])
        .unwrap();

    let reconciled = bp_pipeline::backfill(&streams, &store).unwrap();
    assert_eq!(reconciled, 1);

    let cdc = streams.stream(CDC_STREAM).unwrap();
    assert_eq!(cdc.write_seq(), 1);

    let again = bp_pipeline::backfill(&streams, &store).unwrap();
    assert_eq!(again, 0, "a second backfill over the same store must be a no-op");
}
