// SPDX-License-Identifier: MIT

//! Background checkpointing of consumer-group state, zstd-compressed.
//!
//! The stream segment is the durability boundary (§4.2); this checkpoint is
//! purely a restart-time optimization so a long pending-entry table does
//! not need to be rebuilt by re-scanning the whole segment every time.

use crate::error::StreamError;
use crate::group::ConsumerGroup;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct GroupsSnapshot {
    groups: HashMap<String, ConsumerGroup>,
}

pub struct GroupCheckpoint {
    path: PathBuf,
}

impl GroupCheckpoint {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn save(&self, groups: &HashMap<String, ConsumerGroup>) -> Result<(), StreamError> {
        let snapshot = GroupsSnapshot {
            groups: groups.clone(),
        };
        let json = serde_json::to_vec(&snapshot)?;
        let compressed =
            zstd::encode_all(json.as_slice(), 3).map_err(|e| StreamError::Checkpoint(e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(&compressed)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    pub fn load(&self) -> Result<HashMap<String, ConsumerGroup>, StreamError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let compressed = std::fs::read(&self.path)?;
        let json = zstd::decode_all(compressed.as_slice())
            .map_err(|e| StreamError::Checkpoint(e.to_string()))?;
        let snapshot: GroupsSnapshot = serde_json::from_slice(&json)?;
        Ok(snapshot.groups)
    }
}

pub fn path_for(dir: &Path, stream_name: &str) -> PathBuf {
    dir.join(format!("{stream_name}.groups.zst"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_group_state() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = GroupCheckpoint::new(path_for(dir.path(), "events"));
        let mut groups = HashMap::new();
        let mut group = ConsumerGroup::default();
        group.deliver(1, "worker-a", chrono::Utc::now());
        groups.insert("processors".to_string(), group);

        checkpoint.save(&groups).unwrap();
        let loaded = checkpoint.load().unwrap();
        assert_eq!(loaded["processors"].last_delivered_id, 1);
    }

    #[test]
    fn missing_checkpoint_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = GroupCheckpoint::new(path_for(dir.path(), "events"));
        assert!(checkpoint.load().unwrap().is_empty());
    }
}
