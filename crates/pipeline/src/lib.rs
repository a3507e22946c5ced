// SPDX-License-Identifier: MIT

//! bp-pipeline: fast path (C5), CDC bus (C6), worker pool (C7), and
//! conversation reconstructor (C8).
//!
//! Wires bp-stream, bp-store, and bp-codec together into the Layer 2
//! processing pipeline (§2, §4.5-§4.8). The control plane (bp-daemon) owns
//! construction and lifecycle; this crate only supplies the loops.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod cdc;
mod denormalize;
mod error;
mod fast_path;
mod metrics_worker;
mod reconstructor;
mod stats;
mod worker_pool;

pub use cdc::{backfill, BACKFILL_LIMIT};
pub use error::PipelineError;
pub use fast_path::{
    FastPath, BACKPRESSURE_BATCH_SIZE, BATCH_TIMEOUT, CONSUMER_GROUP, CRITICAL_THRESHOLD, DEFAULT_BATCH_SIZE,
    WARN_THRESHOLD,
};
pub use metrics_worker::MetricsWorker;
pub use reconstructor::Reconstructor;
pub use stats::PipelineStats;
pub use worker_pool::{Worker, WorkerType, DEFAULT_MIN_IDLE, MAX_RETRIES};
