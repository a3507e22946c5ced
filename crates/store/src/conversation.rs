// SPDX-License-Identifier: MIT

//! Conversation reconstructor state (§4.8): cursor sessions, conversations,
//! turns, and code changes. All mutations here are idempotent on
//! `source_event_id` — replaying the same event is a no-op (§4.8, §8).

use crate::error::StoreError;
use crate::Store;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

#[derive(Debug, Clone)]
pub struct NewTurn {
    pub conversation_id: String,
    pub timestamp: String,
    pub turn_type: &'static str,
    pub content_hash: String,
    pub tokens_used: Option<i64>,
    pub latency_ms: Option<i64>,
    pub tools_called: Vec<String>,
    pub source_event_id: String,
}

#[derive(Debug, Clone)]
pub struct NewCodeChange {
    pub conversation_id: String,
    pub turn_id: String,
    pub timestamp: String,
    pub file_extension: Option<String>,
    pub operation: &'static str,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub source_event_id: String,
}

impl Store {
    /// Upserts a cursor session for `external_session_id`, creating it if
    /// unseen (§4.8 `session_start`, state machine `unseen -> active`).
    pub fn upsert_cursor_session(
        &self,
        external_session_id: &str,
        workspace_hash: &str,
        workspace_path: Option<&str>,
        started_at: &str,
    ) -> Result<String, StoreError> {
        let conn = self.conn.lock();
        if let Some(id) = conn
            .query_row(
                "SELECT id FROM cursor_sessions WHERE external_session_id = ?1",
                params![external_session_id],
                |r| r.get::<_, String>(0),
            )
            .optional()?
        {
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO cursor_sessions (id, external_session_id, workspace_hash, workspace_path, started_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, '{}')",
            params![id, external_session_id, workspace_hash, workspace_path, started_at],
        )?;
        Ok(id)
    }

    pub fn end_cursor_session(&self, external_session_id: &str, ended_at: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE cursor_sessions SET ended_at = ?1 WHERE external_session_id = ?2",
            params![ended_at, external_session_id],
        )?;
        Ok(())
    }

    /// Idle-session sweep (§3 lifecycles): ends any cursor session whose
    /// most recent trace is older than `idle_cutoff` (an RFC3339 instant).
    pub fn sweep_idle_cursor_sessions(&self, idle_cutoff: &str, now: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE cursor_sessions SET ended_at = ?1
             WHERE ended_at IS NULL AND started_at < ?2",
            params![now, idle_cutoff],
        )?;
        Ok(n)
    }

    /// Ensures a conversation exists for `(external_id, platform)`,
    /// creating it if absent (§4.8 `user_prompt`).
    pub fn ensure_conversation(
        &self,
        external_id: &str,
        platform: &str,
        workspace_hash: &str,
        session_id: Option<&str>,
        started_at: &str,
    ) -> Result<String, StoreError> {
        let conn = self.conn.lock();
        if let Some(id) = conn
            .query_row(
                "SELECT id FROM conversations WHERE external_id = ?1 AND platform = ?2",
                params![external_id, platform],
                |r| r.get::<_, String>(0),
            )
            .optional()?
        {
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO conversations (id, session_id, external_id, platform, workspace_hash, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, session_id, external_id, platform, workspace_hash, started_at],
        )?;
        Ok(id)
    }

    /// Latest `timestamp` among turns already recorded for `conversation_id`,
    /// used to detect late-arriving events (§4.8 ordering policy). RFC3339
    /// instants compare lexicographically, so a plain string max suffices.
    pub fn max_turn_timestamp(&self, conversation_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let ts = conn
            .query_row(
                "SELECT MAX(timestamp) FROM conversation_turns WHERE conversation_id = ?1",
                params![conversation_id],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        Ok(ts)
    }

    pub fn turn_recorded_for_event(&self, source_event_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM conversation_turns WHERE source_event_id = ?1",
                params![source_event_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn code_change_recorded_for_event(&self, source_event_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM code_changes WHERE source_event_id = ?1",
                params![source_event_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Looks up the code change a later `acceptance_decision` event targets,
    /// by the `event_id` of the `code_change` event that created it.
    pub fn code_change_id_for_event(&self, source_event_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT id FROM code_changes WHERE source_event_id = ?1",
                params![source_event_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Appends a turn, assigning the next `turn_number` under a
    /// transaction-scoped lock so concurrent out-of-order arrivals still
    /// produce a contiguous sequence (§4.8 ordering policy). Returns the
    /// inserted turn's id and whether it was marked `out_of_order`.
    pub fn append_turn(&self, turn: &NewTurn, out_of_order: bool) -> Result<String, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let next_number: i64 = tx.query_row(
            "SELECT COALESCE(MAX(turn_number), 0) + 1 FROM conversation_turns WHERE conversation_id = ?1",
            params![turn.conversation_id],
            |r| r.get(0),
        )?;

        let id = uuid::Uuid::new_v4().to_string();
        let tools_json = serde_json::to_string(&turn.tools_called).unwrap_or_else(|_| "[]".to_string());
        tx.execute(
            "INSERT INTO conversation_turns
                (id, conversation_id, turn_number, timestamp, turn_type, content_hash,
                 tokens_used, latency_ms, tools_called, out_of_order, source_event_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                id,
                turn.conversation_id,
                next_number,
                turn.timestamp,
                turn.turn_type,
                turn.content_hash,
                turn.tokens_used,
                turn.latency_ms,
                tools_json,
                out_of_order as i64,
                turn.source_event_id,
            ],
        )?;

        tx.execute(
            "UPDATE conversations SET interaction_count = interaction_count + 1 WHERE id = ?1",
            params![turn.conversation_id],
        )?;
        if let Some(tokens) = turn.tokens_used {
            tx.execute(
                "UPDATE conversations SET total_tokens = total_tokens + ?1 WHERE id = ?2",
                params![tokens, turn.conversation_id],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    pub fn insert_code_change(&self, change: &NewCodeChange) -> Result<String, StoreError> {
        let conn = self.conn.lock();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO code_changes
                (id, conversation_id, turn_id, timestamp, file_extension, operation,
                 lines_added, lines_removed, accepted, acceptance_delay_ms, revision_count, source_event_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,NULL,NULL,0,?9)",
            params![
                id,
                change.conversation_id,
                change.turn_id,
                change.timestamp,
                change.file_extension,
                change.operation,
                change.lines_added,
                change.lines_removed,
                change.source_event_id,
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET total_changes = total_changes + 1 WHERE id = ?1",
            params![change.conversation_id],
        )?;
        Ok(id)
    }

    pub fn acceptance_decision_recorded_for_event(&self, source_event_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM applied_acceptance_decisions WHERE source_event_id = ?1",
                params![source_event_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Applies an `acceptance_decision` to the code change identified by
    /// `change_id`, recording `source_event_id` so a replay of the same
    /// decision is a no-op (§4.8 idempotency).
    pub fn record_acceptance_decision(
        &self,
        change_id: &str,
        accepted: bool,
        acceptance_delay_ms: i64,
        source_event_id: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO applied_acceptance_decisions (source_event_id, code_change_id) VALUES (?1, ?2)",
            params![source_event_id, change_id],
        )?;
        conn.execute(
            "UPDATE code_changes SET accepted = ?1, acceptance_delay_ms = ?2, revision_count = revision_count + 1
             WHERE id = ?3",
            params![accepted as i64, acceptance_delay_ms, change_id],
        )?;
        conn.execute(
            "UPDATE conversations SET acceptance_rate = (
                SELECT CAST(SUM(CASE WHEN accepted = 1 THEN 1 ELSE 0 END) AS REAL) / COUNT(*)
                FROM code_changes WHERE conversation_id = (
                    SELECT conversation_id FROM code_changes WHERE id = ?1
                ) AND accepted IS NOT NULL
             ) WHERE id = (SELECT conversation_id FROM code_changes WHERE id = ?1)",
            params![change_id],
        )?;
        Ok(())
    }
}
