// SPDX-License-Identifier: MIT

//! Append-only JSONL segment backing a single stream.
//!
//! Carries arbitrary `fields` maps (the flat wire form every component on
//! top of this crate already speaks) instead of a fixed `Event` type, and
//! serves more than one independent reader (consumer groups), rather than
//! a single engine loop.

use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub type Fields = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub fields: Fields,
}

#[derive(Serialize)]
struct EntryRef<'a> {
    id: u64,
    fields: &'a Fields,
}

/// JSONL append-only log assigning monotonically increasing entry ids.
///
/// The segment itself has no notion of "processed" — progress tracking
/// belongs to each consumer group layered on top (§4.2).
pub struct Segment {
    file: File,
    path: PathBuf,
    write_seq: u64,
    write_buffer: Vec<Vec<u8>>,
}

impl Segment {
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (write_seq, corrupt) = Self::scan(&file)?;

        if corrupt {
            let valid = Self::read_valid_lines(&file)?;
            drop(file);
            let bak_path = path.with_extension("jsonl.bak");
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid.len(),
                "corrupt stream segment, rotating to .bak",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut new_file = File::create(path)?;
                for line in &valid {
                    new_file.write_all(line.as_bytes())?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?;
        }

        let (write_seq, _) = if corrupt {
            Self::scan(&file)?
        } else {
            (write_seq, false)
        };

        Ok(Self {
            file,
            path: path.to_owned(),
            write_seq,
            write_buffer: Vec::new(),
        })
    }

    fn scan(file: &File) -> Result<(u64, bool), StreamError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut max_id = 0u64;
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let entry: Entry = match serde_json::from_str(trimmed) {
                Ok(e) => e,
                Err(_) => {
                    corrupt = true;
                    break;
                }
            };
            max_id = max_id.max(entry.id);
        }

        Ok((max_id, corrupt))
    }

    fn read_valid_lines(file: &File) -> Result<Vec<String>, StreamError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut valid = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let _: Entry = match serde_json::from_str(trimmed) {
                Ok(e) => e,
                Err(_) => break,
            };
            valid.push(trimmed.to_string());
        }

        Ok(valid)
    }

    /// Append an entry to the write buffer, returning its assigned id.
    /// Not durable until `flush()`.
    pub fn append(&mut self, fields: Fields) -> Result<u64, StreamError> {
        self.write_seq += 1;
        let id = self.write_seq;
        let json = serde_json::to_vec(&EntryRef { id, fields: &fields })?;
        self.write_buffer.push(json);
        Ok(id)
    }

    pub fn flush(&mut self) -> Result<(), StreamError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        for mut json in self.write_buffer.drain(..) {
            json.push(b'\n');
            self.file.write_all(&json)?;
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// All entries with `id > after`, in id order. Used both for consumer
    /// group delivery and for the backfill/replay paths (§4.6, §4.10).
    pub fn entries_after(&mut self, after: u64) -> Result<Vec<Entry>, StreamError> {
        self.flush()?;
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut out = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry: Entry = match serde_json::from_str(trimmed) {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "corrupt entry during replay, stopping");
                    break;
                }
            };
            if entry.id > after {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Fetch a single entry by id, if still present (not yet trimmed).
    pub fn get(&mut self, id: u64) -> Result<Option<Entry>, StreamError> {
        Ok(self.entries_after(id.saturating_sub(1))?.into_iter().find(|e| e.id == id))
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// Approximate-length trim (spec.md §4.2): drop entries with the
    /// lowest ids until at most `max_len` remain, but never drop an entry
    /// still pending in some consumer group (`min_retained_id`).
    pub fn trim(&mut self, max_len: u64, min_retained_id: u64) -> Result<u64, StreamError> {
        self.flush()?;
        let all = self.entries_after(0)?;
        let cutoff = all.len().saturating_sub(max_len as usize);
        let lowest_allowed = all
            .get(cutoff)
            .map(|e| e.id)
            .unwrap_or(0)
            .min(min_retained_id.max(1));

        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut tmp_file = File::create(&tmp_path)?;
        let mut dropped = 0u64;
        for entry in &all {
            if entry.id >= lowest_allowed {
                let json = serde_json::to_vec(&EntryRef {
                    id: entry.id,
                    fields: &entry.fields,
                })?;
                tmp_file.write_all(&json)?;
                tmp_file.write_all(b"\n")?;
            } else {
                dropped += 1;
            }
        }
        tmp_file.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        Ok(dropped)
    }
}
