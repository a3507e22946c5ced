// SPDX-License-Identifier: MIT

//! Read-only access to Cursor's foreign `state.vscdb` (§4.9 step 1-2).
//!
//! Cursor stores its own telemetry in a SQLite key-value table
//! (`ItemTable(key, value)`) it owns exclusively; we must never acquire a
//! lock that could block Cursor's own writer, so every handle here is
//! opened `SQLITE_OPEN_READ_ONLY` and closed as soon as the poll is done.

use crate::error::MonitorError;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;

pub(crate) fn open_read_only(path: &Path) -> Result<Connection, MonitorError> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|source| {
        MonitorError::OpenDb {
            path: path.display().to_string(),
            source,
        }
    })
}

/// Reads the JSON array stored at `key` in `ItemTable`, or an empty `Vec`
/// if the key has never been written (a fresh Cursor install).
pub(crate) fn read_json_array(conn: &Connection, key: &str) -> Result<Vec<serde_json::Value>, MonitorError> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM ItemTable WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw)? {
        serde_json::Value::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute("CREATE TABLE ItemTable (key TEXT PRIMARY KEY, value TEXT)", [])
            .unwrap();
        conn.execute(
            "INSERT INTO ItemTable (key, value) VALUES ('aiService.generations', ?1)",
            [r#"[{"generationUUID":"a","unixMs":100}]"#],
        )
        .unwrap();
    }

    #[test]
    fn reads_array_at_known_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.vscdb");
        seed_db(&path);

        let conn = open_read_only(&path).unwrap();
        let items = read_json_array(&conn, "aiService.generations").unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn missing_key_yields_empty_vec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.vscdb");
        seed_db(&path);

        let conn = open_read_only(&path).unwrap();
        let items = read_json_array(&conn, "aiService.prompts").unwrap();
        assert!(items.is_empty());
    }
}
