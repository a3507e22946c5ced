// SPDX-License-Identifier: MIT

//! Fast path (C5, §4.5): drains `events`, validates, compresses, batch-
//! inserts raw traces, publishes CDC pointers, acks. Zero blocking reads
//! against the trace store on the write path — no lookups, no joins, just
//! insert-and-forward.

use crate::denormalize;
use crate::stats::PipelineStats;
use bp_codec::{compress, decode, encode};
use bp_core::{Event, Platform};
use bp_store::NewRawTrace;
use bp_stream::{Entry, Stream, StreamClient, CDC_STREAM, DEFAULT_EVENTS_MAX_LEN, EVENTS_STREAM};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const BACKPRESSURE_BATCH_SIZE: usize = 250;
pub const BATCH_TIMEOUT: Duration = Duration::from_millis(100);
pub const READ_BLOCK: Duration = Duration::from_secs(1);
pub const READ_COUNT: usize = 100;

/// Queue-length thresholds that trigger logging and worker pausing (§4.5).
pub const WARN_THRESHOLD: u64 = 10_000;
pub const CRITICAL_THRESHOLD: u64 = 50_000;

pub const CONSUMER_GROUP: &str = "processors";

struct Decoded {
    entry_id: u64,
    event: Event,
}

/// One cooperative fast-path consumer loop (§4.5, §5). The control plane
/// spawns `N` of these (default 1).
pub struct FastPath {
    streams: Arc<StreamClient>,
    store: Arc<bp_store::Store>,
    stats: Arc<PipelineStats>,
    consumer_id: String,
    max_payload_bytes: usize,
    batch_size: usize,
    backpressure_batch_size: usize,
    batch_timeout: Duration,
    warn_threshold: u64,
    critical_threshold: u64,
}

impl FastPath {
    pub fn new(
        streams: Arc<StreamClient>,
        store: Arc<bp_store::Store>,
        stats: Arc<PipelineStats>,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            streams,
            store,
            stats,
            consumer_id: consumer_id.into(),
            max_payload_bytes: bp_core::event::MAX_PAYLOAD_BYTES,
            batch_size: DEFAULT_BATCH_SIZE,
            backpressure_batch_size: BACKPRESSURE_BATCH_SIZE,
            batch_timeout: BATCH_TIMEOUT,
            warn_threshold: WARN_THRESHOLD,
            critical_threshold: CRITICAL_THRESHOLD,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize, backpressure_batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self.backpressure_batch_size = backpressure_batch_size;
        self
    }

    pub fn with_batch_timeout(mut self, batch_timeout: Duration) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn with_thresholds(mut self, warn_threshold: u64, critical_threshold: u64) -> Self {
        self.warn_threshold = warn_threshold;
        self.critical_threshold = critical_threshold;
        self
    }

    /// Runs until `cancel` is set, finishing the in-flight batch first
    /// (§5 drain-on-shutdown).
    pub async fn run(&self, cancel: Arc<AtomicBool>) -> Result<(), crate::error::PipelineError> {
        let events = self.streams.stream(EVENTS_STREAM)?;
        while !cancel.load(Ordering::Relaxed) {
            let depth = events.queue_depth(CONSUMER_GROUP);
            let backpressured = depth >= self.critical_threshold;
            let batch_size = if backpressured {
                self.backpressure_batch_size
            } else {
                self.batch_size
            };
            if depth >= self.warn_threshold {
                warn!(depth, "events stream backlog above warn threshold");
            }

            let entries = self.assemble_batch(events, batch_size).await?;
            if entries.is_empty() {
                continue;
            }

            self.process_batch(entries).await?;
        }
        Ok(())
    }

    /// Assembles one batch up to `batch_size` or until `batch_timeout` has
    /// elapsed since the first entry arrived, whichever comes first (§4.5
    /// step 3). `read_group` itself returns as soon as anything is
    /// available, so the timeout window only starts once this batch has at
    /// least one entry — an empty queue still blocks for a full
    /// `READ_BLOCK` between polls.
    async fn assemble_batch(&self, events: &Stream, batch_size: usize) -> Result<Vec<Entry>, crate::error::PipelineError> {
        let mut batch = events
            .read_group(CONSUMER_GROUP, &self.consumer_id, batch_size.max(READ_COUNT), READ_BLOCK)
            .await?;
        if batch.is_empty() {
            return Ok(batch);
        }

        let deadline = tokio::time::Instant::now() + self.batch_timeout;
        while batch.len() < batch_size {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            let more = events
                .read_group(CONSUMER_GROUP, &self.consumer_id, batch_size - batch.len(), deadline - now)
                .await?;
            if more.is_empty() {
                break;
            }
            batch.extend(more);
        }
        Ok(batch)
    }

    async fn process_batch(&self, entries: Vec<Entry>) -> Result<(), crate::error::PipelineError> {
        let events_stream = self.streams.stream(EVENTS_STREAM)?;
        let mut decoded = Vec::with_capacity(entries.len());
        let mut ack_ids = Vec::with_capacity(entries.len());

        for entry in entries {
            ack_ids.push(entry.id);
            match decode(&entry.fields) {
                Ok(event) => match event.validate(self.max_payload_bytes) {
                    Ok(()) => decoded.push(Decoded { entry_id: entry.id, event }),
                    Err(validation) => {
                        self.deadletter_entry(
                            entry.id,
                            &entry.fields,
                            validation.dead_letter_reason(),
                            &validation.to_string(),
                        )?;
                        self.stats.record_deadlettered();
                    }
                },
                Err(err) => {
                    self.deadletter_entry(entry.id, &entry.fields, "schema_violation", &err.to_string())?;
                    self.stats.record_deadlettered();
                }
            }
        }

        if !decoded.is_empty() {
            self.insert_and_publish(decoded).await?;
        }

        events_stream.ack(CONSUMER_GROUP, &ack_ids)?;
        events_stream.trim(DEFAULT_EVENTS_MAX_LEN)?;
        Ok(())
    }

    async fn insert_and_publish(&self, decoded: Vec<Decoded>) -> Result<(), crate::error::PipelineError> {
        let mut by_platform: HashMap<Platform, Vec<(u64, &Event, NewRawTrace)>> = HashMap::new();
        for item in &decoded {
            let row = build_raw_trace(&item.event)?;
            by_platform
                .entry(item.event.platform)
                .or_default()
                .push((item.entry_id, &item.event, row));
        }

        let store = Arc::clone(&self.store);
        let cdc = self.streams.stream(CDC_STREAM)?;

        for (platform, items) in by_platform {
            let rows: Vec<NewRawTrace> = items.iter().map(|(_, _, row)| row.clone()).collect();
            let store_for_blocking = Arc::clone(&store);
            let insert_result =
                tokio::task::spawn_blocking(move || store_for_blocking.batch_insert_traces(platform, &rows))
                    .await
                    .map_err(|e| crate::error::PipelineError::Decompress(e.to_string()))?;

            match insert_result {
                Ok(inserted) => {
                    self.stats.record_store_success();
                    if inserted < items.len() {
                        self.stats.record_duplicate_n(items.len() - inserted);
                    }

                    let store_for_lookup = Arc::clone(&store);
                    let event_ids: Vec<String> =
                        items.iter().map(|(_, event, _)| event.event_id.as_str().to_string()).collect();
                    let sequences = tokio::task::spawn_blocking(move || {
                        event_ids
                            .into_iter()
                            .map(|event_id| store_for_lookup.sequence_for_event_id(platform, &event_id).unwrap_or(None))
                            .collect::<Vec<_>>()
                    })
                    .await
                    .map_err(|e| crate::error::PipelineError::Decompress(e.to_string()))?;

                    for ((_, event, _), sequence) in items.iter().zip(sequences) {
                        self.stats.record_processed();
                        let Some(sequence) = sequence else {
                            // Row was ignored as a duplicate and never existed before this
                            // batch ran concurrently with another insert of the same id —
                            // nothing new to announce on CDC.
                            continue;
                        };
                        if let Err(err) = cdc.append(cdc_fields(sequence, platform, event)) {
                            error!(error = %err, "CDC publish failed, will reconcile via backfill on restart");
                        }
                    }
                }
                Err(err) => {
                    self.stats.record_store_failure(Utc::now());
                    error!(platform = %platform, error = %err, "batch insert exhausted retries, dead-lettering batch");
                    for (entry_id, event, _) in &items {
                        let fields = encode(event);
                        self.deadletter_entry(*entry_id, &fields, "store_exhausted", &err.to_string())?;
                        self.stats.record_deadlettered();
                    }
                }
            }
        }
        Ok(())
    }

    fn deadletter_entry(
        &self,
        entry_id: u64,
        fields: &HashMap<String, String>,
        reason: &str,
        message: &str,
    ) -> Result<(), crate::error::PipelineError> {
        self.streams
            .deadletter(EVENTS_STREAM, entry_id, reason, message, fields.clone())?;
        Ok(())
    }
}

/// CDC wire form (§6): `sequence`, `platform`, `event_type`, `priority`, `event_id`.
fn cdc_fields(sequence: i64, platform: Platform, event: &Event) -> HashMap<String, String> {
    let mut fields = HashMap::with_capacity(5);
    fields.insert("sequence".into(), sequence.to_string());
    fields.insert("platform".into(), platform.as_str().to_string());
    fields.insert("event_type".into(), event.event_type.as_str().to_string());
    fields.insert("priority".into(), event.event_type.priority().to_string());
    fields.insert("event_id".into(), event.event_id.as_str().to_string());
    fields
}

fn build_raw_trace(event: &Event) -> Result<NewRawTrace, crate::error::PipelineError> {
    let wire = encode(event);
    let body = serde_json::to_vec(&wire).unwrap_or_default();
    let event_data = compress(&body).map_err(|e| crate::error::PipelineError::Decompress(e.to_string()))?;
    let denorm = denormalize::extract(event);
    Ok(NewRawTrace {
        ingested_at: Utc::now().to_rfc3339(),
        event_id: event.event_id.as_str().to_string(),
        external_session_id: event.external_session_id.clone(),
        event_type: event.event_type.as_str().to_string(),
        timestamp: event.timestamp.to_rfc3339(),
        workspace_hash: event.workspace_hash().map(|w| w.as_str().to_string()).unwrap_or_default(),
        generation_uuid: denorm.generation_uuid,
        composer_id: denorm.composer_id,
        bubble_id: denorm.bubble_id,
        tool_name: denorm.tool_name,
        model: denorm.model,
        duration_ms: denorm.duration_ms,
        tokens_used: denorm.tokens_used,
        lines_added: denorm.lines_added,
        lines_removed: denorm.lines_removed,
        event_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_core::{EventBuilder, EventType};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration as StdDuration;

    fn sample_event(id: &str) -> Event {
        EventBuilder::new(id, Platform::ClaudeCode, EventType::ToolUse, "s-1", "ws-1")
            .payload(serde_json::json!({"tool_name": "Read", "duration_ms": 50}))
            .build()
    }

    #[tokio::test]
    async fn drains_a_batch_and_inserts_trace_rows() {
        let dir = tempfile::tempdir().unwrap();
        let streams = Arc::new(StreamClient::open(&dir.path().join("streams")).unwrap());
        let store = Arc::new(bp_store::Store::open_in_memory().unwrap());
        let stats = Arc::new(PipelineStats::new());

        let events = streams.stream(EVENTS_STREAM).unwrap();
        events.append(encode(&sample_event("e-1"))).unwrap();
        events.append(encode(&sample_event("e-2"))).unwrap();

        let fast_path = FastPath::new(Arc::clone(&streams), Arc::clone(&store), Arc::clone(&stats), "fp-1");
        let cancel = Arc::new(AtomicBool::new(false));
        let run = tokio::spawn({
            let cancel = Arc::clone(&cancel);
            async move {
                let _ = tokio::time::timeout(StdDuration::from_millis(500), fast_path.run(cancel)).await;
            }
        });
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        cancel.store(true, Ordering::Relaxed);
        let _ = run.await;

        let row = store.read_trace_by_sequence(Platform::ClaudeCode, 1).unwrap();
        assert!(row.is_some());
        assert_eq!(stats.events_processed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn invalid_event_is_deadlettered_not_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let streams = Arc::new(StreamClient::open(&dir.path().join("streams")).unwrap());
        let store = Arc::new(bp_store::Store::open_in_memory().unwrap());
        let stats = Arc::new(PipelineStats::new());

        let mut wire = encode(&sample_event("e-bad"));
        wire.remove("external_session_id");
        streams.stream(EVENTS_STREAM).unwrap().append(wire).unwrap();

        let fast_path = FastPath::new(Arc::clone(&streams), Arc::clone(&store), Arc::clone(&stats), "fp-1");
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel2 = Arc::clone(&cancel);
        let _ = tokio::time::timeout(StdDuration::from_millis(300), async move {
            fast_path.run(cancel2).await
        })
        .await;

        let dlq = streams.stream(bp_stream::DLQ_STREAM).unwrap();
        assert_eq!(dlq.entries_after(0).unwrap().len(), 1);
        assert_eq!(stats.events_deadlettered.load(Ordering::Relaxed), 1);
    }
}
