// SPDX-License-Identifier: MIT

//! In-memory pipeline health snapshot (§4.10, §6) backing the control
//! plane's `/stats` endpoint: queue depths, worker processed/failed
//! counts, pipeline lag. Not persisted — rebuilt from zero on restart.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub events_processed: AtomicU64,
    pub events_deadlettered: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub worker_processed: AtomicU64,
    pub worker_failed: AtomicU64,
    pub worker_exhausted: AtomicU64,
    /// Unix millis of the oldest unprocessed event's `enqueued_at`, used to
    /// compute pipeline lag (`now - oldest unprocessed enqueued_at`).
    oldest_unprocessed_enqueued_at_ms: AtomicI64,
    /// Unix millis at which the store began failing continuously, or -1
    /// while healthy. Backs the readiness endpoint's sustained-failure
    /// check (§7: "Alert via health readiness = false when sustained > 30s").
    store_failing_since_ms: AtomicI64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            oldest_unprocessed_enqueued_at_ms: AtomicI64::new(-1),
            store_failing_since_ms: AtomicI64::new(-1),
            ..Default::default()
        }
    }

    pub fn record_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deadlettered(&self) {
        self.events_deadlettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_n(&self, n: usize) {
        self.duplicates_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_worker_success(&self) {
        self.worker_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_failure(&self) {
        self.worker_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_exhausted(&self) {
        self.worker_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_oldest_unprocessed(&self, enqueued_at: DateTime<Utc>) {
        self.oldest_unprocessed_enqueued_at_ms
            .store(enqueued_at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn clear_oldest_unprocessed(&self) {
        self.oldest_unprocessed_enqueued_at_ms.store(-1, Ordering::Relaxed);
    }

    /// `now - oldest unprocessed enqueued_at`, or `None` if nothing pending.
    pub fn pipeline_lag(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let ms = self.oldest_unprocessed_enqueued_at_ms.load(Ordering::Relaxed);
        if ms < 0 {
            return None;
        }
        let oldest = DateTime::from_timestamp_millis(ms)?;
        Some(now - oldest)
    }

    /// Marks the start of a store failure streak, if one isn't already
    /// tracked. Idempotent across repeated failures in the same streak so
    /// the readiness check measures the streak's full duration.
    pub fn record_store_failure(&self, now: DateTime<Utc>) {
        let _ = self.store_failing_since_ms.compare_exchange(
            -1,
            now.timestamp_millis(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    pub fn record_store_success(&self) {
        self.store_failing_since_ms.store(-1, Ordering::Relaxed);
    }

    /// Whether the store has been failing continuously for at least `threshold`.
    pub fn store_failing_sustained(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        let ms = self.store_failing_since_ms.load(Ordering::Relaxed);
        if ms < 0 {
            return false;
        }
        match DateTime::from_timestamp_millis(ms) {
            Some(since) => now - since >= threshold,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_is_none_when_nothing_pending() {
        let stats = PipelineStats::new();
        assert!(stats.pipeline_lag(Utc::now()).is_none());
    }

    #[test]
    fn lag_reflects_oldest_unprocessed() {
        let stats = PipelineStats::new();
        let t0 = Utc::now();
        stats.note_oldest_unprocessed(t0);
        let lag = stats.pipeline_lag(t0 + chrono::Duration::seconds(3)).unwrap();
        assert_eq!(lag.num_seconds(), 3);
    }

    #[test]
    fn store_failure_is_not_sustained_until_threshold_elapses() {
        let stats = PipelineStats::new();
        let t0 = Utc::now();
        stats.record_store_failure(t0);
        assert!(!stats.store_failing_sustained(t0 + chrono::Duration::seconds(10), chrono::Duration::seconds(30)));
        assert!(stats.store_failing_sustained(t0 + chrono::Duration::seconds(31), chrono::Duration::seconds(30)));
    }

    #[test]
    fn store_success_clears_the_failure_streak() {
        let stats = PipelineStats::new();
        let t0 = Utc::now();
        stats.record_store_failure(t0);
        stats.record_store_success();
        assert!(!stats.store_failing_sustained(t0 + chrono::Duration::seconds(60), chrono::Duration::seconds(30)));
    }

    #[test]
    fn repeated_failures_keep_the_original_streak_start() {
        let stats = PipelineStats::new();
        let t0 = Utc::now();
        stats.record_store_failure(t0);
        stats.record_store_failure(t0 + chrono::Duration::seconds(20));
        assert!(stats.store_failing_sustained(t0 + chrono::Duration::seconds(31), chrono::Duration::seconds(30)));
    }
}
