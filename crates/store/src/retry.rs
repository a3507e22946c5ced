// SPDX-License-Identifier: MIT

//! Per-worker-type CDC retry counter (§4.7): "tracked per-worker-type in a
//! small key-value table in C3".

use crate::error::StoreError;
use crate::Store;
use rusqlite::{params, OptionalExtension};

impl Store {
    pub fn retry_count(&self, worker_type: &str, cdc_sequence: i64) -> Result<u32, StoreError> {
        let conn = self.conn.lock();
        let count: Option<i64> = conn
            .query_row(
                "SELECT retry_count FROM worker_retry_counts WHERE worker_type = ?1 AND cdc_sequence = ?2",
                params![worker_type, cdc_sequence],
                |r| r.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as u32)
    }

    /// Increments and returns the new retry count for `(worker_type, cdc_sequence)`.
    pub fn increment_retry_count(&self, worker_type: &str, cdc_sequence: i64) -> Result<u32, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO worker_retry_counts (worker_type, cdc_sequence, retry_count)
             VALUES (?1, ?2, 1)
             ON CONFLICT(worker_type, cdc_sequence) DO UPDATE SET retry_count = retry_count + 1",
            params![worker_type, cdc_sequence],
        )?;
        self.retry_count(worker_type, cdc_sequence)
    }

    pub fn clear_retry_count(&self, worker_type: &str, cdc_sequence: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM worker_retry_counts WHERE worker_type = ?1 AND cdc_sequence = ?2",
            params![worker_type, cdc_sequence],
        )?;
        Ok(())
    }
}
