// SPDX-License-Identifier: MIT

//! Control-plane startup and shutdown sequencing (C10, §4.10):
//!
//! open store -> verify schema version -> initialize streams/consumer
//! groups (idempotent) -> CDC backfill -> start fast-path consumers ->
//! start worker pool -> start DB monitors -> expose health. Shutdown runs
//! the reverse: stop DB monitors -> stop producers -> drain fast path and
//! workers (bounded by a configurable timeout) -> close stores.

use crate::config::Config;
use crate::error::DaemonError;
use crate::health::{self, HealthState};
use bp_pipeline::{FastPath, PipelineStats, Worker, WorkerType};
use bp_store::{Store, CURRENT_SCHEMA_VERSION};
use bp_stream::StreamClient;
use fs2::FileExt;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Exclusive lock held for the daemon's lifetime, preventing a second
/// instance from racing writes against the same store and streams dir.
pub struct InstanceLock(#[allow(dead_code)] File);

fn acquire_instance_lock(config: &Config) -> Result<InstanceLock, DaemonError> {
    std::fs::create_dir_all(&config.data_dir)?;
    let lock_path = config.lock_path();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| DaemonError::AlreadyRunning(lock_path.display().to_string()))?;
    Ok(InstanceLock(file))
}

/// A running daemon: the shared handles the health server reads, plus the
/// background tasks and cancellation flag shutdown needs to drain.
pub struct Daemon {
    _lock: InstanceLock,
    pub store: Arc<Store>,
    pub streams: Arc<StreamClient>,
    pub stats: Arc<PipelineStats>,
    cancel: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_timeout: std::time::Duration,
}

impl Daemon {
    /// Runs startup (§4.10) and spawns every background loop. Returns once
    /// everything is scheduled; the caller drives the process lifetime and
    /// calls `shutdown` on signal.
    pub async fn start(config: Config) -> Result<Self, DaemonError> {
        let lock = acquire_instance_lock(&config)?;

        let store = Arc::new(Store::open(&config.store_path())?);
        let found = store.schema_version()?;
        if found != CURRENT_SCHEMA_VERSION {
            return Err(DaemonError::SchemaMismatch {
                found,
                required: CURRENT_SCHEMA_VERSION,
            });
        }

        let streams = Arc::new(StreamClient::open(&config.streams_dir())?);

        let backfilled = bp_pipeline::backfill(&streams, &store)?;
        if backfilled > 0 {
            info!(backfilled, "CDC backfill reconciled traces missed before a prior shutdown");
        }

        let stats = Arc::new(PipelineStats::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();

        let fast_path = FastPath::new(
            Arc::clone(&streams),
            Arc::clone(&store),
            Arc::clone(&stats),
            "fast-path-0",
        )
        .with_batch_size(config.batch_size, config.backpressure_batch_size)
        .with_batch_timeout(config.batch_timeout)
        .with_thresholds(config.warn_threshold, config.critical_threshold);
        let cancel_for_fast_path = Arc::clone(&cancel);
        tasks.push(tokio::spawn(async move {
            if let Err(err) = fast_path.run(cancel_for_fast_path).await {
                error!(loop_name = "fast-path-0", error = %err, "pipeline loop exited with an error");
            }
        }));

        for i in 0..config.metrics_workers {
            let worker = Worker::new(
                WorkerType::Metrics,
                format!("metrics-{i}"),
                Arc::clone(&streams),
                Arc::clone(&store),
                Arc::clone(&stats),
            )
            .with_min_idle(config.min_idle);
            let cancel_for_worker = Arc::clone(&cancel);
            tasks.push(tokio::spawn(async move {
                if let Err(err) = worker.run(cancel_for_worker).await {
                    error!(loop_name = %format!("metrics-{i}"), error = %err, "pipeline loop exited with an error");
                }
            }));
        }

        for i in 0..config.conversation_workers {
            let worker = Worker::new(
                WorkerType::Conversation,
                format!("conversation-{i}"),
                Arc::clone(&streams),
                Arc::clone(&store),
                Arc::clone(&stats),
            )
            .with_min_idle(config.min_idle);
            let cancel_for_worker = Arc::clone(&cancel);
            tasks.push(tokio::spawn(async move {
                if let Err(err) = worker.run(cancel_for_worker).await {
                    error!(loop_name = %format!("conversation-{i}"), error = %err, "pipeline loop exited with an error");
                }
            }));
        }

        for workspace in &config.cursor_workspaces {
            let monitor = bp_monitor::Monitor::new(
                workspace.db_path.clone(),
                workspace.workspace_hash.clone(),
                Arc::clone(&streams),
            )
            .with_poll_interval(config.db_monitor_poll_interval)
            .with_checkpoint_path(config.checkpoint_path());
            let label = format!("cursor-monitor-{}", workspace.workspace_hash);
            let cancel_for_monitor = Arc::clone(&cancel);
            tasks.push(tokio::spawn(async move {
                if let Err(err) = monitor.run(cancel_for_monitor).await {
                    error!(loop_name = %label, error = %err, "cursor db monitor exited with an error");
                }
            }));
        }

        let cancel_for_maintenance = Arc::clone(&cancel);
        let maintenance_config = config.clone();
        let maintenance_store = Arc::clone(&store);
        let maintenance_streams = Arc::clone(&streams);
        tasks.push(tokio::spawn(async move {
            crate::maintenance::run(maintenance_config, maintenance_store, maintenance_streams, cancel_for_maintenance)
                .await;
        }));

        Ok(Self {
            _lock: lock,
            store,
            streams,
            stats,
            cancel,
            tasks,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn health_state(&self, started_at: chrono::DateTime<chrono::Utc>) -> HealthState {
        HealthState {
            streams: Arc::clone(&self.streams),
            store: Arc::clone(&self.store),
            stats: Arc::clone(&self.stats),
            started_at,
        }
    }

    /// Stops every background loop, waiting up to `shutdown_timeout` for
    /// them to drain before abandoning the wait (the process exit reaps
    /// them regardless).
    pub async fn shutdown(self) {
        info!("stopping DB monitors and pipeline loops");
        self.cancel.store(true, Ordering::Relaxed);

        let drain = async {
            for task in self.tasks {
                if let Err(err) = task.await {
                    if !err.is_cancelled() {
                        error!(error = %err, "background task panicked during shutdown");
                    }
                }
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!(timeout_secs = self.shutdown_timeout.as_secs(), "shutdown drain timed out, exiting anyway");
        }
        drop(self.store);
        info!("stores closed");
    }
}

/// Binds the health server's listener, enforcing the loopback-only
/// default before any socket is opened (§7).
pub async fn bind_health_listener(config: &Config) -> Result<tokio::net::TcpListener, DaemonError> {
    Ok(tokio::net::TcpListener::bind(config.health_bind).await?)
}

pub async fn serve_health(
    listener: tokio::net::TcpListener,
    state: HealthState,
    cancel: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let shutdown = async move {
        while !cancel.load(Ordering::Relaxed) {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    };
    health::serve(listener, state, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            health_bind: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
            allow_non_loopback_health_bind: false,
            shutdown_timeout: std::time::Duration::from_millis(200),
            metrics_workers: 0,
            conversation_workers: 0,
            db_monitor_poll_interval: std::time::Duration::from_secs(30),
            cursor_workspaces: Vec::new(),
            batch_size: bp_pipeline::DEFAULT_BATCH_SIZE,
            backpressure_batch_size: bp_pipeline::BACKPRESSURE_BATCH_SIZE,
            batch_timeout: bp_pipeline::BATCH_TIMEOUT,
            warn_threshold: bp_pipeline::WARN_THRESHOLD,
            critical_threshold: bp_pipeline::CRITICAL_THRESHOLD,
            min_idle: bp_pipeline::DEFAULT_MIN_IDLE,
            raw_trace_retention_days: bp_store::DEFAULT_RAW_TRACE_RETENTION_DAYS,
            dlq_retention_days: bp_stream::DEFAULT_DLQ_RETENTION_DAYS,
            cursor_session_idle_after: std::time::Duration::from_secs(24 * 3600),
        }
    }

    #[test]
    fn a_second_instance_cannot_acquire_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let _first = acquire_instance_lock(&config).unwrap();
        let second = acquire_instance_lock(&config);
        assert!(matches!(second, Err(DaemonError::AlreadyRunning(_))));
    }

    #[tokio::test]
    async fn start_and_shutdown_with_no_workers_completes_within_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let daemon = Daemon::start(config).await.unwrap();
        daemon.shutdown().await;
    }
}
