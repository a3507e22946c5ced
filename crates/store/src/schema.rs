// SPDX-License-Identifier: MIT

//! Schema init and pragma configuration (§4.3), grounded on the pragma set
//! and version-check pattern used by `aspy::pipeline::lifestats::init_schema`
//! and `agtrace-index::db::Database::init_schema`.

use crate::error::StoreError;
use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA busy_timeout=5000;
        PRAGMA cache_size=-64000;
        PRAGMA mmap_size=268435456;
        "#,
    )?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    apply_pragmas(conn)?;

    let version: i32 = conn
        .query_row(
            "SELECT COALESCE((SELECT version FROM schema_version LIMIT 1), 0)",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if version < 1 {
        apply_schema_v1(conn)?;
    }

    Ok(())
}

fn raw_trace_table_ddl(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            ingested_at TEXT NOT NULL,
            event_id TEXT NOT NULL UNIQUE,
            external_session_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            workspace_hash TEXT NOT NULL,
            generation_uuid TEXT,
            composer_id TEXT,
            bubble_id TEXT,
            tool_name TEXT,
            model TEXT,
            duration_ms INTEGER,
            tokens_used INTEGER,
            lines_added INTEGER,
            lines_removed INTEGER,
            event_data BLOB NOT NULL,
            event_date TEXT GENERATED ALWAYS AS (substr(timestamp, 1, 10)) STORED,
            event_hour TEXT GENERATED ALWAYS AS (substr(timestamp, 1, 13)) STORED
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_session ON {table}(external_session_id);
        CREATE INDEX IF NOT EXISTS idx_{table}_workspace ON {table}(workspace_hash);
        CREATE INDEX IF NOT EXISTS idx_{table}_date ON {table}(event_date);
        "#
    )
}

fn apply_schema_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

        CREATE TABLE IF NOT EXISTS workspaces (
            workspace_hash TEXT PRIMARY KEY,
            workspace_path TEXT,
            workspace_name TEXT,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cursor_sessions (
            id TEXT PRIMARY KEY,
            external_session_id TEXT NOT NULL UNIQUE,
            workspace_hash TEXT NOT NULL,
            workspace_path TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            session_id TEXT,
            external_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            workspace_hash TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            interaction_count INTEGER NOT NULL DEFAULT 0,
            acceptance_rate REAL NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            total_changes INTEGER NOT NULL DEFAULT 0,
            tool_sequence TEXT NOT NULL DEFAULT '[]',
            acceptance_decisions TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            context TEXT NOT NULL DEFAULT '{}',
            UNIQUE(external_id, platform),
            FOREIGN KEY (session_id) REFERENCES cursor_sessions(id)
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id);

        CREATE TABLE IF NOT EXISTS conversation_turns (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            turn_number INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            turn_type TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            tokens_used INTEGER,
            latency_ms INTEGER,
            tools_called TEXT NOT NULL DEFAULT '[]',
            out_of_order INTEGER NOT NULL DEFAULT 0,
            source_event_id TEXT NOT NULL,
            UNIQUE(conversation_id, turn_number),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        );
        CREATE INDEX IF NOT EXISTS idx_turns_event ON conversation_turns(source_event_id);

        CREATE TABLE IF NOT EXISTS code_changes (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            turn_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            file_extension TEXT,
            operation TEXT NOT NULL,
            lines_added INTEGER NOT NULL DEFAULT 0,
            lines_removed INTEGER NOT NULL DEFAULT 0,
            accepted INTEGER,
            acceptance_delay_ms INTEGER,
            revision_count INTEGER NOT NULL DEFAULT 0,
            source_event_id TEXT NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id),
            FOREIGN KEY (turn_id) REFERENCES conversation_turns(id)
        );
        CREATE INDEX IF NOT EXISTS idx_changes_event ON code_changes(source_event_id);

        CREATE TABLE IF NOT EXISTS applied_acceptance_decisions (
            source_event_id TEXT PRIMARY KEY,
            code_change_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS worker_retry_counts (
            worker_type TEXT NOT NULL,
            cdc_sequence INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (worker_type, cdc_sequence)
        );

        CREATE TABLE IF NOT EXISTS metrics_points (
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            ts INTEGER NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (category, name, ts)
        );

        CREATE TABLE IF NOT EXISTS metrics_rollup (
            resolution TEXT NOT NULL,
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            bucket_ts INTEGER NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (resolution, category, name, bucket_ts)
        );
        "#,
    )?;

    conn.execute_batch(&raw_trace_table_ddl("claude_raw_traces"))?;
    conn.execute_batch(&raw_trace_table_ddl("cursor_raw_traces"))?;

    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}
