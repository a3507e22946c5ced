// SPDX-License-Identifier: MIT

//! Poll checkpoint (§4.9 step 4, §7): `{workspace: last_seen_timestamp}`
//! persisted as a small JSON file in the user's data directory so a
//! restart resumes from where the last successful poll left off.

use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WorkspaceCheckpoint {
    last_seen_ms: i64,
    /// UUIDs already emitted at exactly `last_seen_ms`, so a poll landing
    /// on the same millisecond as the watermark doesn't re-emit them.
    #[serde(default)]
    seen_at_watermark: Vec<String>,
    /// UUIDs of elements that carried no timestamp at all, which the
    /// watermark above can't order (§4.9: "timestamp, or UUID if absent").
    #[serde(default)]
    seen_without_timestamp: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointFile(HashMap<String, WorkspaceCheckpoint>);

pub struct Checkpoint {
    path: PathBuf,
    state: CheckpointFile,
}

impl Checkpoint {
    /// Default location: `<user data dir>/blueplane/cursor-monitor-checkpoint.json`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("blueplane")
            .join("cursor-monitor-checkpoint.json")
    }

    pub fn load(path: PathBuf) -> Result<Self, MonitorError> {
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CheckpointFile::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, state })
    }

    pub fn last_seen_ms(&self, workspace: &str) -> i64 {
        self.state.0.get(workspace).map(|w| w.last_seen_ms).unwrap_or(0)
    }

    pub fn seen_at_watermark(&self, workspace: &str) -> &[String] {
        self.state
            .0
            .get(workspace)
            .map(|w| w.seen_at_watermark.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `ms` (and, for ties on the watermark, `uuid`) is newer than
    /// what has already been emitted for `workspace` (§4.9 step 3).
    pub fn is_new(&self, workspace: &str, uuid: &str, ms: Option<i64>) -> bool {
        let Some(ms) = ms else {
            return !self
                .state
                .0
                .get(workspace)
                .map(|w| w.seen_without_timestamp.iter().any(|u| u == uuid))
                .unwrap_or(false);
        };
        match ms.cmp(&self.last_seen_ms(workspace)) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => !self.seen_at_watermark(workspace).iter().any(|u| u == uuid),
            std::cmp::Ordering::Less => false,
        }
    }

    /// Advances the watermark for `workspace` after a successful poll.
    pub fn advance(
        &mut self,
        workspace: &str,
        last_seen_ms: i64,
        seen_at_watermark: Vec<String>,
        mut seen_without_timestamp: Vec<String>,
    ) {
        let entry = self.state.0.entry(workspace.to_string()).or_default();
        if last_seen_ms > entry.last_seen_ms {
            entry.seen_without_timestamp.clear();
        }
        entry.last_seen_ms = last_seen_ms.max(entry.last_seen_ms);
        entry.seen_at_watermark = seen_at_watermark;
        entry.seen_without_timestamp.append(&mut seen_without_timestamp);
    }

    pub fn persist(&self) -> Result<(), MonitorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(&self.state)?;
        write_atomically(&self.path, &body)
    }
}

fn write_atomically(path: &Path, body: &[u8]) -> Result<(), MonitorError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_checkpoint_treats_everything_as_new() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::load(dir.path().join("checkpoint.json")).unwrap();
        assert!(checkpoint.is_new("ws-1", "a", Some(100)));
        assert!(checkpoint.is_new("ws-1", "a", None));
    }

    #[test]
    fn advance_then_persist_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut checkpoint = Checkpoint::load(path.clone()).unwrap();
        checkpoint.advance("ws-1", 300, vec!["c".to_string()], vec!["no-ts".to_string()]);
        checkpoint.persist().unwrap();

        let reloaded = Checkpoint::load(path).unwrap();
        assert_eq!(reloaded.last_seen_ms("ws-1"), 300);
        assert!(!reloaded.is_new("ws-1", "c", Some(300)));
        assert!(reloaded.is_new("ws-1", "d", Some(400)));
        assert!(!reloaded.is_new("ws-1", "anything", Some(299)));
        assert!(!reloaded.is_new("ws-1", "no-ts", None));
        assert!(reloaded.is_new("ws-1", "other-no-ts", None));
    }
}
