// SPDX-License-Identifier: MIT

//! External DB monitor (C9, §4.9): polls Cursor's foreign database on a
//! fixed interval, transforms new `aiService.generations` /
//! `aiService.prompts` elements into canonical `database_trace` events,
//! and enqueues them on the `events` stream for the fast path to ingest.

use crate::checkpoint::Checkpoint;
use crate::db;
use crate::error::MonitorError;
use bp_core::{EventBuilder, EventType, Platform};
use bp_stream::{StreamClient, EVENTS_STREAM};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default poll interval (§4.9: "polls on a fixed interval (default 30 s)").
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

const GENERATIONS_KEY: &str = "aiService.generations";
const PROMPTS_KEY: &str = "aiService.prompts";
const SOURCE_KEYS: [&str; 2] = [GENERATIONS_KEY, PROMPTS_KEY];

/// Candidate field names tried in order, matching the defensive
/// multiple-candidate style used elsewhere for foreign-schema access.
const UUID_FIELDS: [&str; 3] = ["generationUUID", "bubbleId", "uuid"];
const TIMESTAMP_FIELDS: [&str; 3] = ["unixMs", "timestampMs", "timestamp"];

struct ParsedElement {
    uuid: String,
    timestamp_ms: Option<i64>,
}

fn parse_element(element: &serde_json::Value) -> Result<ParsedElement, &'static str> {
    let obj = element.as_object().ok_or("element is not a JSON object")?;

    let uuid = UUID_FIELDS
        .iter()
        .find_map(|field| obj.get(*field).and_then(serde_json::Value::as_str))
        .ok_or("missing a recognized uuid field")?
        .to_string();

    let timestamp_ms = TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| obj.get(*field).and_then(serde_json::Value::as_i64));

    Ok(ParsedElement { uuid, timestamp_ms })
}

/// Polls one Cursor `state.vscdb` on behalf of one monitored workspace.
pub struct Monitor {
    db_path: PathBuf,
    workspace_hash: String,
    external_session_id: String,
    streams: Arc<StreamClient>,
    checkpoint_path: PathBuf,
    poll_interval: Duration,
}

impl Monitor {
    pub fn new(
        db_path: PathBuf,
        workspace_hash: impl Into<String>,
        streams: Arc<StreamClient>,
    ) -> Self {
        let workspace_hash = workspace_hash.into();
        Self {
            db_path,
            external_session_id: format!("cursor-db-monitor:{workspace_hash}"),
            workspace_hash,
            streams,
            checkpoint_path: Checkpoint::default_path(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_checkpoint_path(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = path;
        self
    }

    /// Runs the poll loop until `cancel` is set. Each tick's failure is
    /// logged and the previous checkpoint is preserved; the next tick
    /// retries (§4.9 Failure).
    pub async fn run(&self, cancel: Arc<AtomicBool>) -> Result<(), MonitorError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await; // first tick fires immediately; consume it up front
        while !cancel.load(Ordering::Relaxed) {
            if let Err(err) = self.poll_once().await {
                error!(error = %err, workspace = %self.workspace_hash, "cursor db poll failed; checkpoint preserved");
            }
            ticker.tick().await;
        }
        Ok(())
    }

    /// Runs a single poll-transform-enqueue cycle (§4.9 steps 1-5).
    /// Returns the number of events enqueued.
    pub async fn poll_once(&self) -> Result<usize, MonitorError> {
        let db_path = self.db_path.clone();
        let raw = tokio::task::spawn_blocking(move || Self::read_all(&db_path))
            .await
            .map_err(|e| MonitorError::Join(e.to_string()))??;

        let mut checkpoint = Checkpoint::load(self.checkpoint_path.clone())?;
        let last_seen_ms = checkpoint.last_seen_ms(&self.workspace_hash);
        let mut max_ms = last_seen_ms;
        let mut seen_at_watermark = checkpoint.seen_at_watermark(&self.workspace_hash).to_vec();
        let mut seen_without_timestamp = Vec::new();

        let events_stream = self.streams.stream(EVENTS_STREAM)?;
        let mut emitted = 0usize;

        for (source_key, elements) in raw {
            for element in elements {
                let parsed = match parse_element(&element) {
                    Ok(parsed) => parsed,
                    Err(reason) => {
                        self.deadletter_malformed(source_key, &element, reason)?;
                        continue;
                    }
                };

                if !checkpoint.is_new(&self.workspace_hash, &parsed.uuid, parsed.timestamp_ms) {
                    continue;
                }

                let event = self.build_event(source_key, &element, &parsed);
                let fields = bp_codec::encode(&event);
                events_stream.append(fields)?;
                emitted += 1;

                match parsed.timestamp_ms {
                    Some(ms) if ms > max_ms => {
                        max_ms = ms;
                        seen_at_watermark.clear();
                        seen_at_watermark.push(parsed.uuid);
                    }
                    Some(ms) if ms == max_ms => seen_at_watermark.push(parsed.uuid),
                    Some(_) => {}
                    None => seen_without_timestamp.push(parsed.uuid),
                }
            }
        }

        checkpoint.advance(&self.workspace_hash, max_ms, seen_at_watermark, seen_without_timestamp);
        checkpoint.persist()?;

        if emitted > 0 {
            info!(emitted, workspace = %self.workspace_hash, "cursor db poll enqueued new elements");
        }
        Ok(emitted)
    }

    /// Blocking: opens the DB read-only, reads both monitored keys, closes
    /// the handle (§4.9 steps 1, 2, 5 — the handle does not outlive this call).
    fn read_all(db_path: &std::path::Path) -> Result<Vec<(&'static str, Vec<serde_json::Value>)>, MonitorError> {
        let conn = db::open_read_only(db_path)?;
        let mut out = Vec::with_capacity(SOURCE_KEYS.len());
        for key in SOURCE_KEYS {
            out.push((key, db::read_json_array(&conn, key)?));
        }
        Ok(out)
    }

    fn build_event(&self, source_key: &str, element: &serde_json::Value, parsed: &ParsedElement) -> bp_core::Event {
        let timestamp = parsed
            .timestamp_ms
            .and_then(chrono::DateTime::from_timestamp_millis)
            .unwrap_or_else(chrono::Utc::now);

        EventBuilder::new(
            format!("cursor-db:{source_key}:{}", parsed.uuid),
            Platform::Cursor,
            EventType::DatabaseTrace,
            self.external_session_id.clone(),
            self.workspace_hash.clone(),
        )
        .timestamp(timestamp)
        .hook_type(source_key.to_string())
        .payload(serde_json::json!({
            "source_key": source_key,
            "element_uuid": parsed.uuid,
            "element": element,
        }))
        .build()
    }

    fn deadletter_malformed(
        &self,
        source_key: &'static str,
        element: &serde_json::Value,
        reason: &'static str,
    ) -> Result<(), MonitorError> {
        warn!(source_key, reason, "dropping malformed cursor db element");
        let mut fields = std::collections::HashMap::new();
        fields.insert("event_id".to_string(), format!("cursor-db:{source_key}:unknown"));
        fields.insert("element".to_string(), element.to_string());
        self.streams
            .deadletter(EVENTS_STREAM, 0, "cursor_element_malformed", reason, fields)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_stream::DLQ_STREAM;
    use rusqlite::Connection;

    fn seed_db(path: &std::path::Path, generations: &str) {
        let conn = Connection::open(path).unwrap();
        conn.execute("CREATE TABLE ItemTable (key TEXT PRIMARY KEY, value TEXT)", [])
            .unwrap();
        conn.execute(
            "INSERT INTO ItemTable (key, value) VALUES ('aiService.generations', ?1)",
            [generations],
        )
        .unwrap();
    }

    fn monitor(dir: &std::path::Path, db_path: PathBuf, streams: Arc<StreamClient>) -> Monitor {
        Monitor::new(db_path, "ws-1", streams).with_checkpoint_path(dir.join("checkpoint.json"))
    }

    #[tokio::test]
    async fn first_poll_emits_all_three_then_only_the_new_one() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.vscdb");
        seed_db(
            &db_path,
            r#"[{"generationUUID":"a","unixMs":100},{"generationUUID":"b","unixMs":200},{"generationUUID":"c","unixMs":300}]"#,
        );
        let streams = Arc::new(StreamClient::open(&dir.path().join("streams")).unwrap());
        let monitor = monitor(dir.path(), db_path.clone(), Arc::clone(&streams));

        let emitted = monitor.poll_once().await.unwrap();
        assert_eq!(emitted, 3);
        let events = streams.stream(EVENTS_STREAM).unwrap().entries_after(0).unwrap();
        assert_eq!(events.len(), 3);

        // Add record D (ts 400); next poll should emit exactly one event.
        seed_db(
            &db_path,
            r#"[{"generationUUID":"a","unixMs":100},{"generationUUID":"b","unixMs":200},{"generationUUID":"c","unixMs":300},{"generationUUID":"d","unixMs":400}]"#,
        );
        let emitted2 = monitor.poll_once().await.unwrap();
        assert_eq!(emitted2, 1);

        // Simulate restart: fresh Monitor, same checkpoint file, no new records.
        let restarted = monitor(dir.path(), db_path, streams);
        let emitted3 = restarted.poll_once().await.unwrap();
        assert_eq!(emitted3, 0);
    }

    #[tokio::test]
    async fn malformed_element_is_dead_lettered_not_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.vscdb");
        seed_db(&db_path, r#"[{"unixMs":100}]"#);
        let streams = Arc::new(StreamClient::open(&dir.path().join("streams")).unwrap());
        let monitor = monitor(dir.path(), db_path, Arc::clone(&streams));

        let emitted = monitor.poll_once().await.unwrap();
        assert_eq!(emitted, 0);
        let dlq = streams.stream(DLQ_STREAM).unwrap().entries_after(0).unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].fields["error_type"], "cursor_element_malformed");
    }
}
