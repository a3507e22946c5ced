// SPDX-License-Identifier: MIT

//! Raw trace batch insert/read (§3, §4.3).

use crate::error::StoreError;
use crate::Store;
use bp_core::Platform;
use rusqlite::{params, OptionalExtension};
use std::thread::sleep;
use std::time::Duration;
use tracing::warn;

/// One row to insert into a platform's raw-trace table. `event_data` is
/// already compressed by the caller (fast path) — the store never touches
/// compression, only storage (§4.1/§4.3 separation of concerns).
#[derive(Debug, Clone)]
pub struct NewRawTrace {
    pub ingested_at: String,
    pub event_id: String,
    pub external_session_id: String,
    pub event_type: String,
    pub timestamp: String,
    pub workspace_hash: String,
    pub generation_uuid: Option<String>,
    pub composer_id: Option<String>,
    pub bubble_id: Option<String>,
    pub tool_name: Option<String>,
    pub model: Option<String>,
    pub duration_ms: Option<i64>,
    pub tokens_used: Option<i64>,
    pub lines_added: Option<i64>,
    pub lines_removed: Option<i64>,
    pub event_data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RawTraceRow {
    pub sequence: i64,
    pub ingested_at: String,
    pub event_id: String,
    pub external_session_id: String,
    pub event_type: String,
    pub timestamp: String,
    pub workspace_hash: String,
    pub event_data: Vec<u8>,
}

/// Backoff schedule for batch insert retries (§4.3/§7: 3 tries, 50/200/1000ms).
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(200),
    Duration::from_millis(1000),
];

impl Store {
    /// Inserts `rows` into the given platform's raw-trace table inside a
    /// single transaction using one multi-row `INSERT OR IGNORE` statement
    /// (§4.3 batch-insert algorithm). Duplicate `event_id` rows are
    /// silently skipped — the idempotency discipline of §7.
    ///
    /// On transient sqlite failure, retries per `RETRY_BACKOFF`; exhausting
    /// retries surfaces `StoreError::BatchExhausted` so the fast path can
    /// dead-letter the batch without acking it (§4.3/§7).
    pub fn batch_insert_traces(
        &self,
        platform: Platform,
        rows: &[NewRawTrace],
    ) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = platform.raw_trace_table();

        let mut last_err = None;
        for (attempt, delay) in std::iter::once(None)
            .chain(RETRY_BACKOFF.into_iter().map(Some))
            .enumerate()
        {
            if let Some(delay) = delay {
                sleep(delay);
            }
            match self.insert_batch_once(table, rows) {
                Ok(n) => return Ok(n),
                Err(e) => {
                    warn!(attempt, table, error = %e, "batch insert failed, retrying");
                    last_err = Some(e);
                }
            }
        }

        Err(StoreError::BatchExhausted {
            attempts: RETRY_BACKOFF.len() as u32 + 1,
            source: last_err.expect("loop always attempts at least once"),
        })
    }

    fn insert_batch_once(&self, table: &str, rows: &[NewRawTrace]) -> Result<usize, rusqlite::Error> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let sql = format!(
                "INSERT OR IGNORE INTO {table} (
                    ingested_at, event_id, external_session_id, event_type, timestamp,
                    workspace_hash, generation_uuid, composer_id, bubble_id, tool_name,
                    model, duration_ms, tokens_used, lines_added, lines_removed, event_data
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)"
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.ingested_at,
                    row.event_id,
                    row.external_session_id,
                    row.event_type,
                    row.timestamp,
                    row.workspace_hash,
                    row.generation_uuid,
                    row.composer_id,
                    row.bubble_id,
                    row.tool_name,
                    row.model,
                    row.duration_ms,
                    row.tokens_used,
                    row.lines_added,
                    row.lines_removed,
                    row.event_data,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Looks up the `sequence` assigned to an already-inserted row, so the
    /// fast path can publish an accurate CDC pointer after a batch insert
    /// (§4.5 step 5).
    pub fn sequence_for_event_id(
        &self,
        platform: Platform,
        event_id: &str,
    ) -> Result<Option<i64>, StoreError> {
        let table = platform.raw_trace_table();
        let conn = self.conn.lock();
        let sql = format!("SELECT sequence FROM {table} WHERE event_id = ?1");
        let sequence = conn.query_row(&sql, params![event_id], |r| r.get(0)).optional()?;
        Ok(sequence)
    }

    pub fn read_trace_by_sequence(
        &self,
        platform: Platform,
        sequence: i64,
    ) -> Result<Option<RawTraceRow>, StoreError> {
        let table = platform.raw_trace_table();
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT sequence, ingested_at, event_id, external_session_id, event_type,
                    timestamp, workspace_hash, event_data
             FROM {table} WHERE sequence = ?1"
        );
        let row = conn
            .query_row(&sql, params![sequence], |r| {
                Ok(RawTraceRow {
                    sequence: r.get(0)?,
                    ingested_at: r.get(1)?,
                    event_id: r.get(2)?,
                    external_session_id: r.get(3)?,
                    event_type: r.get(4)?,
                    timestamp: r.get(5)?,
                    workspace_hash: r.get(6)?,
                    event_data: r.get(7)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Highest assigned `sequence` for a platform, or 0 if the partition is empty.
    pub fn max_sequence(&self, platform: Platform) -> Result<i64, StoreError> {
        let table = platform.raw_trace_table();
        let conn = self.conn.lock();
        let sql = format!("SELECT COALESCE(MAX(sequence), 0) FROM {table}");
        let max = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(max)
    }

    /// Rows with `sequence > since`, ascending, capped at `limit` — the gap
    /// scan CDC backfill uses to bound its work (§4.6: "limited to the last
    /// N = 10 000 rows").
    pub fn read_traces_since_sequence(
        &self,
        platform: Platform,
        since: i64,
        limit: i64,
    ) -> Result<Vec<RawTraceRow>, StoreError> {
        let table = platform.raw_trace_table();
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT sequence, ingested_at, event_id, external_session_id, event_type,
                    timestamp, workspace_hash, event_data
             FROM {table} WHERE sequence > ?1 ORDER BY sequence ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![since, limit], |r| {
                Ok(RawTraceRow {
                    sequence: r.get(0)?,
                    ingested_at: r.get(1)?,
                    event_id: r.get(2)?,
                    external_session_id: r.get(3)?,
                    event_type: r.get(4)?,
                    timestamp: r.get(5)?,
                    workspace_hash: r.get(6)?,
                    event_data: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn read_session_traces(
        &self,
        platform: Platform,
        external_session_id: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<RawTraceRow>, StoreError> {
        let table = platform.raw_trace_table();
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT sequence, ingested_at, event_id, external_session_id, event_type,
                    timestamp, workspace_hash, event_data
             FROM {table}
             WHERE external_session_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY sequence ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![external_session_id, from, to], |r| {
                Ok(RawTraceRow {
                    sequence: r.get(0)?,
                    ingested_at: r.get(1)?,
                    event_id: r.get(2)?,
                    external_session_id: r.get(3)?,
                    event_type: r.get(4)?,
                    timestamp: r.get(5)?,
                    workspace_hash: r.get(6)?,
                    event_data: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn create_or_update_workspace(
        &self,
        workspace_hash: &str,
        workspace_path: Option<&str>,
        workspace_name: Option<&str>,
        now: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO workspaces (workspace_hash, workspace_path, workspace_name, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(workspace_hash) DO UPDATE SET
                workspace_path = COALESCE(?2, workspace_path),
                workspace_name = COALESCE(?3, workspace_name),
                last_seen_at = ?4",
            params![workspace_hash, workspace_path, workspace_name, now],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn sample_row(event_id: &str) -> NewRawTrace {
        NewRawTrace {
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
            duration_ms: Some(120),
            tokens_used: None,
            lines_added: None,
            lines_removed: None,
            event_data: b"compressed".to_vec(),
        }
    }

    #[test]
    fn batch_insert_assigns_monotonic_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("telemetry.db")).unwrap();
        let rows = vec![sample_row("e-1"), sample_row("e-2")];
        let inserted = store.batch_insert_traces(Platform::ClaudeCode, &rows).unwrap();
        assert_eq!(inserted, 2);

        let row1 = store
            .read_trace_by_sequence(Platform::ClaudeCode, 1)
            .unwrap()
            .unwrap();
        assert_eq!(row1.event_id, "e-1");
    }

    #[test]
    fn duplicate_event_id_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("telemetry.db")).unwrap();
        let row = sample_row("e-dup");
        store
            .batch_insert_traces(Platform::ClaudeCode, &[row.clone()])
            .unwrap();
        let second = store
            .batch_insert_traces(Platform::ClaudeCode, &[row])
            .unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn platforms_are_isolated_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("telemetry.db")).unwrap();
        store
            .batch_insert_traces(Platform::ClaudeCode, &[sample_row("e-1")])
            .unwrap();
        assert!(store
            .read_trace_by_sequence(Platform::Cursor, 1)
            .unwrap()
            .is_none());
    }
}
