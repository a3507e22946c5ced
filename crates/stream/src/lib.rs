// SPDX-License-Identifier: MIT

//! bp-stream: durable stream client (C2) and CDC bus (C6).
//!
//! A typed wrapper over independent append-only logs, each with its own
//! consumer groups, pending-entry tracking, dead-lettering, and
//! approximate-length trimming (§4.2): any number of named streams
//! carrying flat field maps.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod checkpoint;
mod client;
mod error;
mod group;
mod segment;
mod stream;

pub use client::{StreamClient, CDC_STREAM, DEFAULT_DLQ_RETENTION_DAYS, DEFAULT_EVENTS_MAX_LEN, DLQ_STREAM, EVENTS_STREAM};
pub use error::StreamError;
pub use group::{ConsumerGroup, PendingEntry};
pub use segment::{Entry, Fields};
pub use stream::Stream;
