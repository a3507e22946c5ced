// SPDX-License-Identifier: MIT

//! Control-plane health surface (§4.10, §7): `/health`, `/ready`, `/stats`,
//! readable by a local supervisor. Loopback-only unless the operator opts
//! into a wider bind in config.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use bp_pipeline::PipelineStats;
use bp_stream::StreamClient;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct HealthState {
    pub streams: Arc<StreamClient>,
    pub store: Arc<bp_store::Store>,
    pub stats: Arc<PipelineStats>,
    pub started_at: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    uptime_secs: i64,
}

async fn liveness(State(state): State<HealthState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "up",
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// Readiness only flips false once a store failure streak has lasted this
/// many seconds, so a single transient blip doesn't flap the endpoint (§7:
/// "Alert via health readiness = false when sustained > 30s").
const SUSTAINED_FAILURE_THRESHOLD_SECS: i64 = 30;

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    streams_reachable: bool,
    store_failing_sustained: bool,
}

async fn readiness(State(state): State<HealthState>) -> Json<ReadinessResponse> {
    let streams_reachable = state.streams.stream(bp_stream::EVENTS_STREAM).is_ok();
    let store_failing_sustained = state
        .stats
        .store_failing_sustained(Utc::now(), chrono::Duration::seconds(SUSTAINED_FAILURE_THRESHOLD_SECS));
    Json(ReadinessResponse {
        ready: streams_reachable && !store_failing_sustained,
        streams_reachable,
        store_failing_sustained,
    })
}

#[derive(Serialize)]
struct StatsResponse {
    events_processed: u64,
    events_deadlettered: u64,
    duplicates_dropped: u64,
    worker_processed: u64,
    worker_failed: u64,
    worker_exhausted: u64,
    queue_depth_events: u64,
    queue_depth_cdc_metrics: u64,
    queue_depth_cdc_conversation: u64,
    pipeline_lag_secs: Option<i64>,
}

async fn stats(State(state): State<HealthState>) -> Json<StatsResponse> {
    let depth = |stream, group| {
        state
            .streams
            .stream(stream)
            .map(|s| s.queue_depth(group))
            .unwrap_or(0)
    };

    Json(StatsResponse {
        events_processed: state.stats.events_processed.load(Ordering::Relaxed),
        events_deadlettered: state.stats.events_deadlettered.load(Ordering::Relaxed),
        duplicates_dropped: state.stats.duplicates_dropped.load(Ordering::Relaxed),
        worker_processed: state.stats.worker_processed.load(Ordering::Relaxed),
        worker_failed: state.stats.worker_failed.load(Ordering::Relaxed),
        worker_exhausted: state.stats.worker_exhausted.load(Ordering::Relaxed),
        queue_depth_events: depth(bp_stream::EVENTS_STREAM, bp_pipeline::CONSUMER_GROUP),
        queue_depth_cdc_metrics: depth(bp_stream::CDC_STREAM, "workers.metrics"),
        queue_depth_cdc_conversation: depth(bp_stream::CDC_STREAM, "workers.conversation"),
        pipeline_lag_secs: state.stats.pipeline_lag(Utc::now()).map(|d| d.num_seconds()),
    })
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Serves the health router until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: HealthState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> HealthState {
        let dir = tempfile::tempdir().unwrap();
        HealthState {
            streams: Arc::new(StreamClient::open(&dir.path().join("streams")).unwrap()),
            store: Arc::new(bp_store::Store::open_in_memory().unwrap()),
            stats: Arc::new(PipelineStats::new()),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ready_when_store_has_never_failed() {
        let state = test_state();
        let response = readiness(State(state)).await;
        assert!(response.ready);
        assert!(!response.store_failing_sustained);
    }

    #[tokio::test]
    async fn not_ready_once_store_failure_is_sustained() {
        let state = test_state();
        state.stats.record_store_failure(Utc::now() - chrono::Duration::seconds(31));
        let response = readiness(State(state)).await;
        assert!(!response.ready);
        assert!(response.store_failing_sustained);
    }

    #[tokio::test]
    async fn transient_store_failure_does_not_flip_readiness() {
        let state = test_state();
        state.stats.record_store_failure(Utc::now());
        let response = readiness(State(state)).await;
        assert!(response.ready);
        assert!(!response.store_failing_sustained);
    }
}
