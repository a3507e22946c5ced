// SPDX-License-Identifier: MIT

//! bpd: the blueplane control-plane daemon.
//!
//! Starts the store, streams, fast path, worker pool, and Cursor DB
//! monitors (§4.10), serves the loopback health surface, and drains
//! everything on SIGTERM/SIGINT.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use bp_daemon::{bind_health_listener, serve_health, Config, Daemon};
use chrono::Utc;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

/// blueplane control-plane daemon
#[derive(Parser, Debug)]
#[command(name = "bpd", version)]
struct Cli {
    /// Path to config.toml (default: ~/.blueplane/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run in the foreground instead of logging only to file.
    #[arg(long)]
    foreground: bool,
}

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotates `log_path` if it has grown past [`MAX_LOG_SIZE`], keeping up to
/// [`MAX_ROTATED_LOGS`] prior files. Best-effort: failures are ignored so
/// the daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

const STARTUP_MARKER_PREFIX: &str = "--- bpd: starting (pid: ";

fn write_startup_marker(log_path: &std::path::Path) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    writeln!(file, "{}{}) ---\n", STARTUP_MARKER_PREFIX, std::process::id())
}

fn setup_logging(
    log_path: &std::path::Path,
    foreground: bool,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if foreground {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        return Ok(None);
    }

    let parent = log_path.parent().context("log path has no parent directory")?;
    let name = log_path.file_name().context("log path has no file name")?;
    std::fs::create_dir_all(parent)?;
    let file_appender = tracing_appender::rolling::never(parent, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    if !cli.foreground {
        rotate_log_if_needed(&config.log_path());
        write_startup_marker(&config.log_path())?;
    }
    let _log_guard = setup_logging(&config.log_path(), cli.foreground)?;

    info!(data_dir = %config.data_dir.display(), health_bind = %config.health_bind, "starting bpd");

    let started_at = Utc::now();
    let daemon = match Daemon::start(config.clone()).await {
        Ok(daemon) => daemon,
        Err(err) => {
            error!(error = %err, "failed to start daemon");
            return Err(err.into());
        }
    };

    let health_listener = bind_health_listener(&config).await?;
    let health_cancel = Arc::new(AtomicBool::new(false));
    let health_state = daemon.health_state(started_at);
    let health_task = tokio::spawn(serve_health(health_listener, health_state, Arc::clone(&health_cancel)));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    daemon.shutdown().await;

    health_cancel.store(true, Ordering::Relaxed);
    if let Err(err) = health_task.await {
        if !err.is_cancelled() {
            error!(error = %err, "health server task panicked");
        }
    }

    info!("bpd exited cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_marker_is_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("bpd.log");
        write_startup_marker(&log_path).unwrap();
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.starts_with(STARTUP_MARKER_PREFIX));
    }

    #[test]
    fn log_rotation_is_a_noop_below_the_size_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("bpd.log");
        std::fs::write(&log_path, b"small").unwrap();
        rotate_log_if_needed(&log_path);
        assert!(log_path.exists());
        assert!(!dir.path().join("bpd.log.1").exists());
    }
}
