// SPDX-License-Identifier: MIT

//! bp-daemon: the control plane (C10, §4.10) that owns the store, streams,
//! fast path, worker pool, and Cursor DB monitors for a single host, and
//! exposes a loopback health surface.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod error;
mod health;
mod lifecycle;
mod maintenance;

pub use config::{Config, CursorWorkspace};
pub use error::DaemonError;
pub use health::HealthState;
pub use lifecycle::{bind_health_listener, serve_health, Daemon};
