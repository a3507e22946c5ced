// SPDX-License-Identifier: MIT

//! Daily vacuum: delete rows older than retention, then reclaim space
//! (§3 lifecycles, §4.3 "Vacuum runs daily", §6 retention policy).

use crate::error::StoreError;
use crate::Store;
use bp_core::Platform;
use rusqlite::params;

pub const DEFAULT_RAW_TRACE_RETENTION_DAYS: i64 = 90;

impl Store {
    /// Deletes raw-trace rows older than `cutoff_date` (an `event_date`
    /// string, `YYYY-MM-DD`) for one platform partition, then runs
    /// `VACUUM` to reclaim space. Returns rows deleted.
    pub fn vacuum_raw_traces(&self, platform: Platform, cutoff_date: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let table = platform.raw_trace_table();
        let deleted = conn.execute(
            &format!("DELETE FROM {table} WHERE event_date < ?1"),
            params![cutoff_date],
        )?;
        if deleted > 0 {
            conn.execute("VACUUM", [])?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NewRawTrace;
    use crate::Store;

    fn row(event_id: &str, date: &str) -> NewRawTrace {
        NewRawTrace {
            ingested_at: format!("{date}T00:00:00Z"),
            event_id: event_id.into(),
            external_session_id: "s-1".into(),
            event_type: "tool_use".into(),
            timestamp: format!("{date}T00:00:00Z"),
            workspace_hash: "ws-1".into(),
            generation_uuid: None,
            composer_id: None,
            bubble_id: None,
            tool_name: None,
            model: None,
            duration_ms: None,
            tokens_used: None,
            lines_added: None,
            lines_removed: None,
            event_data: b"x".to_vec(),
        }
    }

    #[test]
    fn vacuum_drops_rows_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("telemetry.db")).unwrap();
        store
            .batch_insert_traces(
                Platform::ClaudeCode,
                &[row("e-old", "2020-01-01"), row("e-new", "2030-01-01")],
            )
            .unwrap();

        let deleted = store.vacuum_raw_traces(Platform::ClaudeCode, "2025-01-01").unwrap();
        assert_eq!(deleted, 1);
        assert!(store.read_trace_by_sequence(Platform::ClaudeCode, 1).unwrap().is_none());
        assert!(store.read_trace_by_sequence(Platform::ClaudeCode, 2).unwrap().is_some());
    }
}
