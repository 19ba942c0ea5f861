//! Append-only JSONL log of served sync requests

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug)]
pub struct SyncLogEntry {
    pub timestamp: String,
    pub peer: String,
    pub command: String,
    /// Files the client was told to delete.
    pub deleted: usize,
    /// Files whose contents were sent.
    pub updated: usize,
    /// Planned updates dropped because the file became unreadable.
    pub skipped: usize,
    pub bytes_sent: u64,
}

impl SyncLogEntry {
    pub fn now(peer: String, command: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            peer,
            command: command.to_string(),
            deleted: 0,
            updated: 0,
            skipped: 0,
            bytes_sent: 0,
        }
    }
}

pub struct SyncLog {
    log_file_path: PathBuf,
}

impl SyncLog {
    pub fn new(path: &Path) -> Self {
        SyncLog {
            log_file_path: path.to_path_buf(),
        }
    }

    pub fn append(&self, entry: &SyncLogEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open sync log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<SyncLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open sync log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: SyncLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
