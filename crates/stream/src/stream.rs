// SPDX-License-Identifier: MIT

//! A single named stream: a `Segment` plus its consumer groups (§4.2).

use crate::checkpoint::{path_for, GroupCheckpoint};
use crate::error::StreamError;
use crate::group::ConsumerGroup;
use crate::segment::{Entry, Fields, Segment};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

struct Inner {
    segment: Segment,
    groups: HashMap<String, ConsumerGroup>,
}

/// One named, durable, multi-consumer-group stream.
///
/// Cloning shares the same underlying state (`Arc`-like via the owning
/// `StreamClient`); callers obtain a `Stream` handle from the client rather
/// than constructing one directly.
pub struct Stream {
    name: String,
    inner: Mutex<Inner>,
    checkpoint: GroupCheckpoint,
}

impl Stream {
    pub fn open(dir: &Path, name: &str) -> Result<Self, StreamError> {
        let segment = Segment::open(&dir.join(format!("{name}.jsonl")))?;
        let checkpoint = GroupCheckpoint::new(path_for(dir, name));
        let groups = checkpoint.load().unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            inner: Mutex::new(Inner { segment, groups }),
            checkpoint,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append(&self, fields: Fields) -> Result<u64, StreamError> {
        let mut inner = self.inner.lock();
        let id = inner.segment.append(fields)?;
        inner.segment.flush()?;
        Ok(id)
    }

    /// Blocks up to `block` waiting for new entries if none are
    /// immediately available, per spec.md §4.2.
    pub async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Entry>, StreamError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let batch = {
                let mut inner = self.inner.lock();
                self.deliver_batch(&mut inner, group, consumer, count)?
            };
            if !batch.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn deliver_batch(
        &self,
        inner: &mut Inner,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<Entry>, StreamError> {
        let now = Utc::now();
        let state = inner.groups.entry(group.to_string()).or_default();

        // First, re-deliver this consumer's own still-pending entries
        // (crash recovery: spec.md §4.2 "including previously pending ones
        // on first call after restart").
        let pending_ids = state.pending_for(consumer);
        let mut out = Vec::new();
        if !pending_ids.is_empty() {
            for id in pending_ids.into_iter().take(count) {
                if let Some(entry) = inner.segment.get(id)? {
                    out.push(entry);
                }
            }
            if !out.is_empty() {
                return Ok(out);
            }
        }

        let after = state.last_delivered_id;
        let fresh = inner.segment.entries_after(after)?;
        for entry in fresh.into_iter().take(count) {
            inner
                .groups
                .get_mut(group)
                .expect("group entry inserted above")
                .deliver(entry.id, consumer, now);
            out.push(entry);
        }
        Ok(out)
    }

    pub fn ack(&self, group: &str, ids: &[u64]) -> Result<(), StreamError> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.groups.get_mut(group) {
            state.ack(ids);
        }
        Ok(())
    }

    /// Takes over messages idle longer than `min_idle`, reassigning them to
    /// `consumer` (spec.md §4.2, §4.7 stuck-message reclaim).
    pub fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<Entry>, StreamError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let min_idle = ChronoDuration::from_std(min_idle).unwrap_or(ChronoDuration::zero());
        let stale_ids = match inner.groups.get(group) {
            Some(state) => state.stale(min_idle, now),
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        for id in stale_ids {
            if let Some(entry) = inner.segment.get(id)? {
                out.push(entry);
            }
        }
        if let Some(state) = inner.groups.get_mut(group) {
            for entry in &out {
                state.deliver(entry.id, consumer, now);
            }
        }
        if !out.is_empty() {
            debug!(stream = %self.name, group, consumer, count = out.len(), "reclaimed stale entries");
        }
        Ok(out)
    }

    /// Approximate-length trim, never discarding an entry still pending in
    /// any consumer group (spec.md §4.2 "isolate pending-entry state from
    /// trimming").
    pub fn trim(&self, max_len: u64) -> Result<u64, StreamError> {
        let mut inner = self.inner.lock();
        let min_retained = inner
            .groups
            .values()
            .filter_map(|g| g.min_pending_id())
            .min()
            .unwrap_or(u64::MAX);
        inner.segment.trim(max_len, min_retained)
    }

    pub fn entries_after(&self, after: u64) -> Result<Vec<Entry>, StreamError> {
        self.inner.lock().segment.entries_after(after)
    }

    pub fn write_seq(&self) -> u64 {
        self.inner.lock().segment.write_seq()
    }

    /// Approximate backlog for `group`: entries written but not yet
    /// delivered to it. Used for backpressure decisions (§4.5); cheap
    /// because it only compares counters, no log scan.
    pub fn queue_depth(&self, group: &str) -> u64 {
        let inner = self.inner.lock();
        let delivered = inner.groups.get(group).map(|g| g.last_delivered_id).unwrap_or(0);
        inner.segment.write_seq().saturating_sub(delivered)
    }

    /// Persist consumer-group state to the checkpoint file.
    pub fn checkpoint(&self) -> Result<(), StreamError> {
        let inner = self.inner.lock();
        self.checkpoint.save(&inner.groups)
    }
}
