// SPDX-License-Identifier: MIT

//! Consumer group state: per-group delivery cursor and pending-entry list
//! (§4.2, §6 "Pending-entry list").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub consumer: String,
    pub delivered_at: DateTime<Utc>,
}

/// One named consumer group over a stream.
///
/// `last_delivered_id` advances as new entries are handed out; entries
/// remain in `pending` from delivery until `ack` removes them. A message
/// whose sender crashed before acking stays in `pending` and is picked up
/// again by `claim_stale` once it has been idle past `min_idle`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerGroup {
    pub last_delivered_id: u64,
    pub pending: BTreeMap<u64, PendingEntry>,
}

impl ConsumerGroup {
    pub fn deliver(&mut self, id: u64, consumer: &str, now: DateTime<Utc>) {
        self.last_delivered_id = self.last_delivered_id.max(id);
        self.pending.insert(
            id,
            PendingEntry {
                consumer: consumer.to_string(),
                delivered_at: now,
            },
        );
    }

    pub fn ack(&mut self, ids: &[u64]) {
        for id in ids {
            self.pending.remove(id);
        }
    }

    /// Pending entries for `consumer` delivered before this group's cursor
    /// moved past them — replayed on first `read_group` call after restart.
    pub fn pending_for(&self, consumer: &str) -> Vec<u64> {
        self.pending
            .iter()
            .filter(|(_, p)| p.consumer == consumer)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids idle longer than `min_idle`, regardless of owning consumer.
    pub fn stale(&self, min_idle: chrono::Duration, now: DateTime<Utc>) -> Vec<u64> {
        self.pending
            .iter()
            .filter(|(_, p)| now - p.delivered_at >= min_idle)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Lowest id still pending, used to keep trimming from discarding
    /// entries a consumer group has not yet acknowledged.
    pub fn min_pending_id(&self) -> Option<u64> {
        self.pending.keys().next().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_entries_are_found_by_idle_duration() {
        let mut group = ConsumerGroup::default();
        let t0 = Utc::now();
        group.deliver(1, "worker-a", t0);
        assert!(group.stale(chrono::Duration::minutes(5), t0).is_empty());
        let later = t0 + chrono::Duration::minutes(6);
        assert_eq!(group.stale(chrono::Duration::minutes(5), later), vec![1]);
    }

    #[test]
    fn ack_removes_from_pending() {
        let mut group = ConsumerGroup::default();
        let t0 = Utc::now();
        group.deliver(1, "worker-a", t0);
        group.ack(&[1]);
        assert!(group.pending.is_empty());
    }

    #[test]
    fn pending_for_consumer_survives_restart_replay() {
        let mut group = ConsumerGroup::default();
        let t0 = Utc::now();
        group.deliver(1, "worker-a", t0);
        group.deliver(2, "worker-b", t0);
        assert_eq!(group.pending_for("worker-a"), vec![1]);
    }
}
