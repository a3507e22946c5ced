// SPDX-License-Identifier: MIT

//! Periodic maintenance loop (§3 lifecycles, §4.4, §6 retention): raw-trace
//! vacuum, DLQ trim, metrics rollup, and idle Cursor session sweep, spawned
//! alongside the rest of Layer 2's producers and workers by `Daemon::start`.

use crate::config::Config;
use bp_core::Platform;
use bp_store::{Resolution, Store};
use bp_stream::StreamClient;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const TICK_INTERVAL: Duration = Duration::from_secs(60);
const ROLLUP_RESOLUTIONS: [Resolution; 3] = [Resolution::OneMinute, Resolution::FiveMinute, Resolution::OneHour];
const PLATFORMS: [Platform; 2] = [Platform::ClaudeCode, Platform::Cursor];

async fn sleep_respecting_cancel(duration: Duration, cancel: &AtomicBool) {
    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Runs daily vacuum and DLQ trim, hourly idle-session sweep, and per-minute
/// metrics rollup on a single ticking loop until `cancel` is set.
pub async fn run(config: Config, store: Arc<Store>, streams: Arc<StreamClient>, cancel: Arc<AtomicBool>) {
    let mut rollup_watermarks = [0i64; ROLLUP_RESOLUTIONS.len()];
    let mut last_daily = None::<chrono::NaiveDate>;
    let mut last_sweep = Utc::now() - chrono::Duration::hours(1);

    while !cancel.load(Ordering::Relaxed) {
        let now = Utc::now();

        for (i, resolution) in ROLLUP_RESOLUTIONS.into_iter().enumerate() {
            let since = rollup_watermarks[i];
            match store.metrics_rollup_pass(resolution, since) {
                Ok(_) => rollup_watermarks[i] = now.timestamp(),
                Err(err) => error!(error = %err, "metrics rollup pass failed"),
            }
        }

        if now - last_sweep >= chrono::Duration::hours(1) {
            let idle_cutoff = (now - chrono::Duration::from_std(config.cursor_session_idle_after).unwrap_or_default())
                .to_rfc3339();
            match store.sweep_idle_cursor_sessions(&idle_cutoff, &now.to_rfc3339()) {
                Ok(n) if n > 0 => info!(swept = n, "ended idle cursor sessions"),
                Ok(_) => {}
                Err(err) => error!(error = %err, "idle cursor session sweep failed"),
            }
            last_sweep = now;
        }

        let today = now.date_naive();
        if last_daily != Some(today) {
            for platform in PLATFORMS {
                let cutoff_date = (now - chrono::Duration::days(config.raw_trace_retention_days))
                    .format("%Y-%m-%d")
                    .to_string();
                match store.vacuum_raw_traces(platform, &cutoff_date) {
                    Ok(n) if n > 0 => info!(platform = %platform, deleted = n, "vacuumed raw traces past retention"),
                    Ok(_) => {}
                    Err(err) => error!(platform = %platform, error = %err, "raw trace vacuum failed"),
                }
            }

            let dlq_cutoff = now - chrono::Duration::days(config.dlq_retention_days);
            match streams.trim_dlq_older_than(dlq_cutoff) {
                Ok(n) if n > 0 => info!(trimmed = n, "trimmed DLQ entries past retention"),
                Ok(_) => {}
                Err(err) => error!(error = %err, "DLQ retention trim failed"),
            }

            last_daily = Some(today);
        }

        sleep_respecting_cancel(TICK_INTERVAL, &cancel).await;
    }
}
