// SPDX-License-Identifier: MIT

//! CDC bus (C6, §4.6): thin wrapper over the `cdc` stream plus the
//! startup backfill that closes the window between "trace inserted" and
//! "CDC published" after a crash.

use bp_core::{EventType, Platform};
use bp_store::Store;
use bp_stream::{StreamClient, CDC_STREAM};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;

/// Gap scan is bounded to the most recent rows per platform (§4.6).
pub const BACKFILL_LIMIT: i64 = 10_000;

const PLATFORMS: [Platform; 2] = [Platform::ClaudeCode, Platform::Cursor];

/// The highest `sequence` already represented on the `cdc` stream, per
/// platform, scanned from the stream's own entries.
fn highest_known_sequence(streams: &StreamClient, platform: Platform) -> Result<i64, crate::error::PipelineError> {
    let cdc = streams.stream(CDC_STREAM)?;
    let after = cdc.write_seq().saturating_sub(BACKFILL_LIMIT as u64);
    let mut max = 0i64;
    for entry in cdc.entries_after(after)? {
        if entry.fields.get("platform").map(String::as_str) != Some(platform.as_str()) {
            continue;
        }
        if let Some(seq) = entry.fields.get("sequence").and_then(|s| s.parse::<i64>().ok()) {
            max = max.max(seq);
        }
    }
    Ok(max)
}

/// Backfills any raw trace rows inserted after the CDC stream's last known
/// sequence per platform, run once at control-plane startup before workers
/// start (§4.6, §4.10).
pub fn backfill(streams: &StreamClient, store: &Store) -> Result<usize, crate::error::PipelineError> {
    let mut total = 0usize;
    for platform in PLATFORMS {
        let store_max = store.max_sequence(platform)?;
        let known = highest_known_sequence(streams, platform)?;
        if known >= store_max {
            continue;
        }

        let rows = store.read_traces_since_sequence(platform, known, BACKFILL_LIMIT)?;
        let cdc = streams.stream(CDC_STREAM)?;
        for row in &rows {
            let event_type = EventType::from_str(&row.event_type).unwrap_or(EventType::Performance);
            let mut fields = HashMap::with_capacity(5);
            fields.insert("sequence".into(), row.sequence.to_string());
            fields.insert("platform".into(), platform.as_str().to_string());
            fields.insert("event_type".into(), row.event_type.clone());
            fields.insert("priority".into(), event_type.priority().to_string());
            fields.insert("event_id".into(), row.event_id.clone());
            cdc.append(fields)?;
            total += 1;
        }
        info!(platform = %platform, backfilled = rows.len(), "CDC backfill complete for platform");
    }
    Ok(total)
}
