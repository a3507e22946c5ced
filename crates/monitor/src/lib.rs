// SPDX-License-Identifier: MIT

//! bp-monitor: external DB monitor (C9, §4.9).
//!
//! Polls Cursor's foreign, externally-mutated embedded database and
//! transforms newly-observed elements into canonical events on the
//! `events` stream, alongside the rest of Layer 2's producers.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod checkpoint;
mod db;
mod error;
mod poller;

pub use checkpoint::Checkpoint;
pub use error::MonitorError;
pub use poller::{Monitor, DEFAULT_POLL_INTERVAL};
