// SPDX-License-Identifier: MIT

//! Worker pool (C7, §4.7): parallel workers sharing the `cdc` stream,
//! partitioned by worker type into its own consumer group so each CDC
//! message is delivered to exactly one worker of each type.

use crate::metrics_worker::MetricsWorker;
use crate::reconstructor::Reconstructor;
use crate::stats::PipelineStats;
use bp_codec::{decode, decompress};
use bp_core::{EventType, Platform};
use bp_store::Store;
use bp_stream::{StreamClient, CDC_STREAM};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub const MAX_RETRIES: u32 = 3;
pub const DEFAULT_MIN_IDLE: Duration = Duration::from_secs(5 * 60);
pub const READ_COUNT: usize = 32;
pub const READ_BLOCK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerType {
    Metrics,
    Conversation,
}

impl WorkerType {
    pub fn group(&self) -> &'static str {
        match self {
            WorkerType::Metrics => "workers.metrics",
            WorkerType::Conversation => "workers.conversation",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkerType::Metrics => "metrics",
            WorkerType::Conversation => "conversation",
        }
    }

    fn handles(&self, event_type: EventType) -> bool {
        match self {
            WorkerType::Metrics => MetricsWorker::handles(event_type),
            WorkerType::Conversation => Reconstructor::handles(event_type),
        }
    }
}

/// One cooperative worker loop. The control plane spawns `metrics x 2`,
/// `conversation x 2` by default (§4.7).
pub struct Worker {
    worker_type: WorkerType,
    consumer_id: String,
    streams: Arc<StreamClient>,
    store: Arc<Store>,
    stats: Arc<PipelineStats>,
    metrics_worker: MetricsWorker,
    reconstructor: Reconstructor,
    min_idle: Duration,
}

impl Worker {
    pub fn new(
        worker_type: WorkerType,
        consumer_id: impl Into<String>,
        streams: Arc<StreamClient>,
        store: Arc<Store>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            worker_type,
            consumer_id: consumer_id.into(),
            streams,
            store: Arc::clone(&store),
            stats,
            metrics_worker: MetricsWorker::new(Arc::clone(&store)),
            reconstructor: Reconstructor::new(store),
            min_idle: DEFAULT_MIN_IDLE,
        }
    }

    pub fn with_min_idle(mut self, min_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub async fn run(&self, cancel: Arc<AtomicBool>) -> Result<(), crate::error::PipelineError> {
        let cdc = self.streams.stream(CDC_STREAM)?;
        let group = self.worker_type.group();
        while !cancel.load(Ordering::Relaxed) {
            let reclaimed = cdc.claim_stale(group, &self.consumer_id, self.min_idle)?;
            if !reclaimed.is_empty() {
                warn!(group, count = reclaimed.len(), "reclaimed stale CDC entries");
                for entry in reclaimed {
                    self.process_one(entry.id, &entry.fields).await?;
                }
                continue;
            }

            let entries = cdc.read_group(group, &self.consumer_id, READ_COUNT, READ_BLOCK).await?;
            for entry in entries {
                self.process_one(entry.id, &entry.fields).await?;
            }
        }
        Ok(())
    }

    async fn process_one(
        &self,
        cdc_id: u64,
        fields: &std::collections::HashMap<String, String>,
    ) -> Result<(), crate::error::PipelineError> {
        let cdc = self.streams.stream(CDC_STREAM)?;
        let group = self.worker_type.group();

        let Some(event_type) = fields.get("event_type").and_then(|s| EventType::from_str(s).ok()) else {
            cdc.ack(group, &[cdc_id])?;
            return Ok(());
        };
        if !self.worker_type.handles(event_type) {
            cdc.ack(group, &[cdc_id])?;
            return Ok(());
        }

        let Some(sequence) = fields.get("sequence").and_then(|s| s.parse::<i64>().ok()) else {
            cdc.ack(group, &[cdc_id])?;
            return Ok(());
        };
        let Some(platform) = fields.get("platform").and_then(|s| Platform::from_str(s).ok()) else {
            cdc.ack(group, &[cdc_id])?;
            return Ok(());
        };

        let result = self.dispatch(platform, sequence).await;
        match result {
            Ok(()) => {
                self.store.clear_retry_count(self.worker_type.label(), cdc_id as i64)?;
                cdc.ack(group, &[cdc_id])?;
                self.stats.record_worker_success();
            }
            Err(err) => {
                let retries = self
                    .store
                    .increment_retry_count(self.worker_type.label(), cdc_id as i64)?;
                error!(sequence, worker = self.worker_type.label(), retries, error = %err, "worker dispatch failed");
                self.stats.record_worker_failure();
                if retries >= MAX_RETRIES {
                    self.streams.deadletter(
                        CDC_STREAM,
                        cdc_id,
                        "worker_exhausted",
                        &err.to_string(),
                        fields.clone(),
                    )?;
                    self.store.clear_retry_count(self.worker_type.label(), cdc_id as i64)?;
                    cdc.ack(group, &[cdc_id])?;
                    self.stats.record_worker_exhausted();
                }
                // Below max retries: leave un-acked so it is redelivered as
                // a pending entry on this worker's next loop iteration, or
                // reclaimed via claim_stale if this worker dies first.
            }
        }
        Ok(())
    }

    async fn dispatch(&self, platform: Platform, sequence: i64) -> Result<(), crate::error::PipelineError> {
        let store = Arc::clone(&self.store);
        let row = tokio::task::spawn_blocking(move || store.read_trace_by_sequence(platform, sequence))
            .await
            .map_err(|e| crate::error::PipelineError::Decompress(e.to_string()))??
            .ok_or(crate::error::PipelineError::MissingTrace(sequence))?;

        let body = decompress(&row.event_data)?;
        let wire: bp_codec::WireFields =
            serde_json::from_slice(&body).map_err(|e| crate::error::PipelineError::Decompress(e.to_string()))?;
        let event = decode(&wire)?;

        match self.worker_type {
            WorkerType::Metrics => self.metrics_worker.handle(&event),
            WorkerType::Conversation => self.reconstructor.handle(&event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_codec::{compress, encode};
    use bp_core::EventBuilder;
    use std::time::Duration as StdDuration;

    fn insert_tool_use_row(store: &Store, event_id: &str) -> i64 {
        let event = EventBuilder::new(event_id, Platform::ClaudeCode, EventType::ToolUse, "s-1", "ws-1")
            .payload(serde_json::json!({"tool_name": "Read", "duration_ms": 10}))
            .build();
        let wire = encode(&event);
        let body = serde_json::to_vec(&wire).unwrap();
        let row = bp_store::NewRawTrace {
            ingested_at: "2026-01-01T00:00:00Z".into(),
            event_id: event_id.into(),
            external_session_id: "s-1".into(),
            event_type: "tool_use".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            workspace_hash: "ws-1".into(),
            generation_uuid: None,
            composer_id: None,
            bubble_id: None,
            tool_name: Some("Read".into()),
            model: None,
            duration_ms: Some(10),
            tokens_used: None,
            lines_added: None,
            lines_removed: None,
            event_data: compress(&body).unwrap(),
        };
        store.batch_insert_traces(Platform::ClaudeCode, &[row]).unwrap();
        store.sequence_for_event_id(Platform::ClaudeCode, event_id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn metrics_worker_processes_and_acks_matching_cdc_entry() {
        let dir = tempfile::tempdir().unwrap();
        let streams = Arc::new(StreamClient::open(&dir.path().join("streams")).unwrap());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let stats = Arc::new(PipelineStats::new());

        let sequence = insert_tool_use_row(&store, "e-1");
        let cdc = streams.stream(CDC_STREAM).unwrap();
        let mut fields = std::collections::HashMap::new();
        fields.insert("sequence".into(), sequence.to_string());
        fields.insert("platform".into(), "claude_code".into());
        fields.insert("event_type".into(), "tool_use".into());
        fields.insert("priority".into(), "2".into());
        fields.insert("event_id".into(), "e-1".into());
        cdc.append(fields).unwrap();

        let worker = Worker::new(
            WorkerType::Metrics,
            "w-1",
            Arc::clone(&streams),
            Arc::clone(&store),
            Arc::clone(&stats),
        );
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel2 = Arc::clone(&cancel);
        let _ = tokio::time::timeout(StdDuration::from_millis(300), worker.run(cancel2)).await;

        assert_eq!(stats.worker_processed.load(Ordering::Relaxed), 1);
        let points = store.metrics_range("tools", "duration_ms", 0, i64::MAX).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[tokio::test]
    async fn conversation_worker_ignores_metrics_only_event_types() {
        let dir = tempfile::tempdir().unwrap();
        let streams = Arc::new(StreamClient::open(&dir.path().join("streams")).unwrap());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let stats = Arc::new(PipelineStats::new());

        let cdc = streams.stream(CDC_STREAM).unwrap();
        let mut fields = std::collections::HashMap::new();
        fields.insert("sequence".into(), "1".into());
        fields.insert("platform".into(), "claude_code".into());
        fields.insert("event_type".into(), "performance".into());
        fields.insert("priority".into(), "3".into());
        fields.insert("event_id".into(), "e-1".into());
        cdc.append(fields).unwrap();

        let worker = Worker::new(
            WorkerType::Conversation,
            "w-1",
            Arc::clone(&streams),
            Arc::clone(&store),
            Arc::clone(&stats),
        );
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel2 = Arc::clone(&cancel);
        let _ = tokio::time::timeout(StdDuration::from_millis(300), worker.run(cancel2)).await;

        // Acknowledged as no-op: nothing left pending for this group.
        let empty = cdc.read_group("workers.conversation", "w-1", 10, StdDuration::from_millis(20)).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(stats.worker_processed.load(Ordering::Relaxed), 0);
    }
}
