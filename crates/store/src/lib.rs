// SPDX-License-Identifier: MIT

//! bp-store: embedded trace store (C3) and metrics time-series store (C4).
//!
//! A single `rusqlite` connection, serialized behind `parking_lot::Mutex`,
//! backs both — "all writers funnel through the store object, not through
//! independent connections, to keep sequence assignment monotonic" (§5).

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod conversation;
mod error;
mod metrics;
mod retention;
mod retry;
mod schema;
mod trace;

pub use conversation::{NewCodeChange, NewTurn};
pub use error::StoreError;
pub use metrics::{MetricPoint, Resolution};
pub use retention::DEFAULT_RAW_TRACE_RETENTION_DAYS;
pub use schema::CURRENT_SCHEMA_VERSION;
pub use trace::{NewRawTrace, RawTraceRow};

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<i32, StoreError> {
        let conn = self.conn.lock();
        let version: i32 = conn.query_row(
            "SELECT COALESCE((SELECT version FROM schema_version LIMIT 1), 0)",
            [],
            |r| r.get(0),
        )?;
        Ok(version)
    }
}
