// SPDX-License-Identifier: MIT

//! Layered configuration: built-in defaults, overridden by
//! `~/.blueplane/config.toml` if present, overridden again by `BLUEPLANE_*`
//! environment variables (§4.10, §7).

use crate::error::DaemonError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CursorWorkspace {
    pub workspace_hash: String,
    pub db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for the store, streams, checkpoint, and log file.
    pub data_dir: PathBuf,
    /// Loopback-only by default (§7 control-plane surface).
    pub health_bind: SocketAddr,
    /// Whether `health_bind` was explicitly configured, allowing a
    /// non-loopback address (§7: "must refuse bindings to non-loopback
    /// addresses unless explicitly configured").
    pub allow_non_loopback_health_bind: bool,
    pub shutdown_timeout: Duration,
    pub metrics_workers: usize,
    pub conversation_workers: usize,
    pub db_monitor_poll_interval: Duration,
    pub cursor_workspaces: Vec<CursorWorkspace>,
    /// Fast path batch size and the smaller size it falls back to once the
    /// events queue backs up past `critical_threshold` (§4.5).
    pub batch_size: usize,
    pub backpressure_batch_size: usize,
    /// How long the fast path waits for a batch to fill before flushing
    /// whatever it has (§4.5 step 3).
    pub batch_timeout: Duration,
    pub warn_threshold: u64,
    pub critical_threshold: u64,
    /// Minimum idle time before a worker pool claims another worker's
    /// unacked CDC entries (§4.7).
    pub min_idle: Duration,
    pub raw_trace_retention_days: i64,
    pub dlq_retention_days: i64,
    /// How long a Cursor session can go without activity before the
    /// maintenance sweep marks it ended (§4.4, default 24h).
    pub cursor_session_idle_after: Duration,
}

impl Config {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("telemetry.db")
    }

    pub fn streams_dir(&self) -> PathBuf {
        self.data_dir.join("streams")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("telemetry.log")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("daemon.pid")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join("cursor-monitor-checkpoint.json")
    }

    fn defaults() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("blueplane");
        Self {
            data_dir,
            health_bind: SocketAddr::from(([127, 0, 0, 1], 7878)),
            allow_non_loopback_health_bind: false,
            shutdown_timeout: Duration::from_secs(10),
            metrics_workers: 2,
            conversation_workers: 2,
            db_monitor_poll_interval: bp_monitor::DEFAULT_POLL_INTERVAL,
            cursor_workspaces: Vec::new(),
            batch_size: bp_pipeline::DEFAULT_BATCH_SIZE,
            backpressure_batch_size: bp_pipeline::BACKPRESSURE_BATCH_SIZE,
            batch_timeout: bp_pipeline::BATCH_TIMEOUT,
            warn_threshold: bp_pipeline::WARN_THRESHOLD,
            critical_threshold: bp_pipeline::CRITICAL_THRESHOLD,
            min_idle: bp_pipeline::DEFAULT_MIN_IDLE,
            raw_trace_retention_days: bp_store::DEFAULT_RAW_TRACE_RETENTION_DAYS,
            dlq_retention_days: bp_stream::DEFAULT_DLQ_RETENTION_DAYS,
            cursor_session_idle_after: Duration::from_secs(24 * 3600),
        }
    }

    /// Default config file location: `~/.blueplane/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".blueplane")
            .join("config.toml")
    }

    /// Builds configuration by layering: built-in defaults, then `path`
    /// (or the default path) if it exists, then `BLUEPLANE_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, DaemonError> {
        let mut config = Self::defaults();

        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if let Ok(raw) = std::fs::read_to_string(&config_path) {
            let file: RawConfig = toml::from_str(&raw).map_err(|source| DaemonError::Config {
                path: config_path.display().to_string(),
                source,
            })?;
            file.apply(&mut config);
        }

        apply_env_overrides(&mut config);

        if config.health_bind.ip() != std::net::Ipv4Addr::LOCALHOST
            && config.health_bind.ip() != std::net::Ipv6Addr::LOCALHOST.into()
            && !config.allow_non_loopback_health_bind
        {
            return Err(DaemonError::NonLoopbackHealthBind(config.health_bind));
        }

        Ok(config)
    }
}

/// Mirrors `Config` with every field optional, for TOML deserialization.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    data_dir: Option<PathBuf>,
    health_bind: Option<SocketAddr>,
    allow_non_loopback_health_bind: Option<bool>,
    shutdown_timeout_secs: Option<u64>,
    metrics_workers: Option<usize>,
    conversation_workers: Option<usize>,
    db_monitor_poll_interval_secs: Option<u64>,
    #[serde(default)]
    cursor_workspace: Vec<RawCursorWorkspace>,
    batch_size: Option<usize>,
    backpressure_batch_size: Option<usize>,
    batch_timeout_ms: Option<u64>,
    warn_threshold: Option<u64>,
    critical_threshold: Option<u64>,
    min_idle_secs: Option<u64>,
    raw_trace_retention_days: Option<i64>,
    dlq_retention_days: Option<i64>,
    cursor_session_idle_after_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawCursorWorkspace {
    workspace_hash: String,
    db_path: PathBuf,
}

impl RawConfig {
    fn apply(self, config: &mut Config) {
        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = self.health_bind {
            config.health_bind = v;
        }
        if let Some(v) = self.allow_non_loopback_health_bind {
            config.allow_non_loopback_health_bind = v;
        }
        if let Some(v) = self.shutdown_timeout_secs {
            config.shutdown_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.metrics_workers {
            config.metrics_workers = v;
        }
        if let Some(v) = self.conversation_workers {
            config.conversation_workers = v;
        }
        if let Some(v) = self.db_monitor_poll_interval_secs {
            config.db_monitor_poll_interval = Duration::from_secs(v);
        }
        if !self.cursor_workspace.is_empty() {
            config.cursor_workspaces = self
                .cursor_workspace
                .into_iter()
                .map(|w| CursorWorkspace {
                    workspace_hash: w.workspace_hash,
                    db_path: w.db_path,
                })
                .collect();
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.backpressure_batch_size {
            config.backpressure_batch_size = v;
        }
        if let Some(v) = self.batch_timeout_ms {
            config.batch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.warn_threshold {
            config.warn_threshold = v;
        }
        if let Some(v) = self.critical_threshold {
            config.critical_threshold = v;
        }
        if let Some(v) = self.min_idle_secs {
            config.min_idle = Duration::from_secs(v);
        }
        if let Some(v) = self.raw_trace_retention_days {
            config.raw_trace_retention_days = v;
        }
        if let Some(v) = self.dlq_retention_days {
            config.dlq_retention_days = v;
        }
        if let Some(v) = self.cursor_session_idle_after_secs {
            config.cursor_session_idle_after = Duration::from_secs(v);
        }
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("BLUEPLANE_DATA_DIR") {
        config.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("BLUEPLANE_HEALTH_BIND") {
        if let Ok(addr) = v.parse() {
            config.health_bind = addr;
        }
    }
    if std::env::var("BLUEPLANE_ALLOW_NON_LOOPBACK_HEALTH_BIND").as_deref() == Ok("1") {
        config.allow_non_loopback_health_bind = true;
    }
    if let Ok(v) = std::env::var("BLUEPLANE_SHUTDOWN_TIMEOUT_SECS") {
        if let Ok(secs) = v.parse() {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_DB_MONITOR_POLL_INTERVAL_SECS") {
        if let Ok(secs) = v.parse() {
            config.db_monitor_poll_interval = Duration::from_secs(secs);
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_BATCH_SIZE") {
        if let Ok(n) = v.parse() {
            config.batch_size = n;
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_BACKPRESSURE_BATCH_SIZE") {
        if let Ok(n) = v.parse() {
            config.backpressure_batch_size = n;
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_BATCH_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.batch_timeout = Duration::from_millis(ms);
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_WARN_THRESHOLD") {
        if let Ok(n) = v.parse() {
            config.warn_threshold = n;
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_CRITICAL_THRESHOLD") {
        if let Ok(n) = v.parse() {
            config.critical_threshold = n;
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_MIN_IDLE_SECS") {
        if let Ok(secs) = v.parse() {
            config.min_idle = Duration::from_secs(secs);
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_RAW_TRACE_RETENTION_DAYS") {
        if let Ok(days) = v.parse() {
            config.raw_trace_retention_days = days;
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_DLQ_RETENTION_DAYS") {
        if let Ok(days) = v.parse() {
            config.dlq_retention_days = days;
        }
    }
    if let Ok(v) = std::env::var("BLUEPLANE_CURSOR_SESSION_IDLE_AFTER_SECS") {
        if let Ok(secs) = v.parse() {
            config.cursor_session_idle_after = Duration::from_secs(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_to_loopback() {
        let config = Config::defaults();
        assert!(config.health_bind.ip().is_loopback());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "metrics_workers = 5\nshutdown_timeout_secs = 30\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.metrics_workers, 5);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn toml_file_overrides_new_tunables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "batch_size = 50\nraw_trace_retention_days = 30\ndlq_retention_days = 3\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.raw_trace_retention_days, 30);
        assert_eq!(config.dlq_retention_days, 3);
    }

    #[test]
    fn non_loopback_bind_is_rejected_without_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "health_bind = \"0.0.0.0:7878\"\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, DaemonError::NonLoopbackHealthBind(_)));
    }
}
