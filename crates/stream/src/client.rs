// SPDX-License-Identifier: MIT

//! `StreamClient`: opens the three streams the pipeline shares (spec.md
//! §4.2: `events`, `cdc`, `dlq`) and provides the dead-letter convenience
//! that builds the DLQ wire form of spec.md §6.

use crate::error::StreamError;
use crate::segment::Fields;
use crate::stream::Stream;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const EVENTS_STREAM: &str = "events";
pub const CDC_STREAM: &str = "cdc";
pub const DLQ_STREAM: &str = "dlq";

/// Default approximate trim target for the main events queue (spec.md §4.2).
pub const DEFAULT_EVENTS_MAX_LEN: u64 = 10_000;

/// Default DLQ retention (spec.md §6: "DLQ: 7 days").
pub const DEFAULT_DLQ_RETENTION_DAYS: i64 = 7;

pub struct StreamClient {
    dir: PathBuf,
    streams: HashMap<String, Stream>,
}

impl StreamClient {
    /// Opens `events`, `cdc`, and `dlq` under `dir`, idempotently (spec.md
    /// §4.10 control-plane startup: "initialize streams and consumer
    /// groups (idempotent)").
    pub fn open(dir: &Path) -> Result<Self, StreamError> {
        std::fs::create_dir_all(dir)?;
        let mut streams = HashMap::new();
        for name in [EVENTS_STREAM, CDC_STREAM, DLQ_STREAM] {
            streams.insert(name.to_string(), Stream::open(dir, name)?);
        }
        Ok(Self {
            dir: dir.to_owned(),
            streams,
        })
    }

    pub fn stream(&self, name: &str) -> Result<&Stream, StreamError> {
        self.streams
            .get(name)
            .ok_or_else(|| StreamError::UnknownStream(name.to_string()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends a dead-letter entry to `dlq` with the cause fields spec.md
    /// §6 requires (`original_event_id`, `error_type`, ...).
    pub fn deadletter(
        &self,
        original_stream: &str,
        original_id: u64,
        reason: &str,
        error_message: &str,
        mut fields: Fields,
    ) -> Result<u64, StreamError> {
        let now = Utc::now().to_rfc3339();
        let original_event_id = fields.get("event_id").cloned().unwrap_or_default();
        fields.insert("original_event_id".into(), original_event_id);
        fields.insert("original_stream_id".into(), format!("{original_stream}:{original_id}"));
        fields.insert("error_type".into(), reason.to_string());
        fields.insert("error_message".into(), error_message.to_string());
        fields.entry("error_stack".into()).or_insert_with(String::new);
        fields.insert("attempted_at".into(), now.clone());
        fields.entry("retry_count".into()).or_insert_with(|| "0".to_string());
        fields.insert("dlq_queued_at".into(), now);
        fields.insert("can_retry".into(), "false".to_string());
        fields.insert("suggested_action".into(), "none".to_string());

        self.stream(DLQ_STREAM)?.append(fields)
    }

    /// Trims `dlq` down to entries whose `dlq_queued_at` is at or after
    /// `cutoff` (spec.md §6 DLQ retention). Entries without a parseable
    /// timestamp are kept, erring toward retention over data loss.
    pub fn trim_dlq_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StreamError> {
        let dlq = self.stream(DLQ_STREAM)?;
        let entries = dlq.entries_after(0)?;
        let keep = entries
            .iter()
            .filter(|entry| {
                entry
                    .fields
                    .get("dlq_queued_at")
                    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                    .map(|ts| ts.with_timezone(&Utc) >= cutoff)
                    .unwrap_or(true)
            })
            .count();
        dlq.trim(keep as u64)
    }

    pub fn checkpoint_all(&self) -> Result<(), StreamError> {
        for stream in self.streams.values() {
            stream.checkpoint()?;
        }
        Ok(())
    }
}
