//! Durable per-user chat history.
//!
//! Each user's exchanges live in `<history_dir>/<user>_history.jsonl`, one
//! [`ChatRecord`] per line, oldest first. The username is escaped with
//! [`escape_file_component`] so any username maps to exactly one file
//! inside the directory.
//!
//! `append` and `clear` for one user are serialised through a per-username
//! lock; different users never contend. Backups are separate archival
//! snapshots that [`HistoryStore::load`] never reads.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::fsutil::{create_unique, escape_file_component, write_atomically};
use crate::models::ChatRecord;

pub struct HistoryStore {
    dir: PathBuf,
    backup_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            backup_dir: backup_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, username: &str) -> PathBuf {
        self.dir
            .join(format!("{}_history.jsonl", escape_file_component(username)))
    }

    /// The user's full history in insertion order; empty if none exists.
    pub fn load(&self, username: &str) -> Result<Vec<ChatRecord>> {
        read_records(&self.path_for(username))
    }

    /// Add one record after everything already stored.
    pub fn append(&self, username: &str, record: &ChatRecord) -> Result<()> {
        let lock = self.user_lock(username);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = self.path_for(username);
        let mut records = read_records(&path)?;
        records.push(record.clone());
        write_atomically(&path, &encode_records(&records)?)
            .with_context(|| format!("Failed to write history for '{}'", username))?;
        tracing::info!(username, records = records.len(), "history appended");
        Ok(())
    }

    /// Delete the user's durable history. Clearing an empty history is not
    /// an error.
    pub fn clear(&self, username: &str) -> Result<()> {
        let lock = self.user_lock(username);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = self.path_for(username);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(username, "history cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to clear {}", path.display())),
        }
    }

    /// Snapshot `live_view` to a new timestamped file under the backup
    /// directory. Existing backups are never overwritten.
    pub fn backup(&self, username: &str, live_view: &[ChatRecord]) -> Result<PathBuf> {
        let stem = format!(
            "{}_chat_backup_{}",
            escape_file_component(username),
            chrono::Local::now().format("%Y%m%d%H%M%S")
        );
        let path = create_unique(&self.backup_dir, &stem, "jsonl", &encode_records(live_view)?)?;
        tracing::info!(username, records = live_view.len(), path = %path.display(), "chat backed up");
        Ok(path)
    }

    fn user_lock(&self, username: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(username.to_string()).or_default().clone()
    }
}

/// Records whose text contains `query`, ignoring case, in their original
/// order. The text searched is the timestamp, question and answer of each
/// record; an empty query matches everything.
pub fn search(history: &[ChatRecord], query: &str) -> Vec<ChatRecord> {
    if query.is_empty() {
        return history.to_vec();
    }
    let needle = query.to_lowercase();
    history
        .iter()
        .filter(|r| r.searchable_text().to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

fn read_records(path: &Path) -> Result<Vec<ChatRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read history: {}", path.display()))
        }
    };
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: malformed history record", path.display(), i + 1))
        })
        .collect()
}

fn encode_records(records: &[ChatRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}
