// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("another daemon instance is already running (lock held at {0})")]
    AlreadyRunning(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid config at {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("refusing to bind health server to non-loopback address {0} without explicit opt-in")]
    NonLoopbackHealthBind(std::net::SocketAddr),
    #[error(transparent)]
    Store(#[from] bp_store::StoreError),
    #[error(transparent)]
    Stream(#[from] bp_stream::StreamError),
    #[error(transparent)]
    Pipeline(#[from] bp_pipeline::PipelineError),
    #[error("schema version mismatch: store reports {found}, this binary requires {required}")]
    SchemaMismatch { found: i32, required: i32 },
}
