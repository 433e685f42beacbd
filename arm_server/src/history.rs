//! Command history and audit trail.
//!
//! Every robot operation attempt is handed to an [`AuditSink`] as
//! `(user, operation, details, was_error)`. [`CommandHistory`] keeps the
//! most recent entries in memory for reports; [`CsvAuditLog`] appends them to
//! disk and is what the admin log report reads back.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Receives one record per operation attempt. Must tolerate concurrent calls.
pub trait AuditSink: Send + Sync {
    fn record(&self, username: &str, operation: &str, details: &str, was_error: bool);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Local>,
    pub username: String,
    pub operation: String,
    pub details: String,
    pub was_error: bool,
}

/// Totals plus the entries they were computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReport {
    pub total_commands: usize,
    pub total_errors: usize,
    pub entries: Vec<HistoryEntry>,
}

impl CommandReport {
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self {
            total_commands: entries.len(),
            total_errors: entries.iter().filter(|e| e.was_error).count(),
            entries,
        }
    }
}

/// Entries kept in memory before the oldest are dropped.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// In-memory history, safe to share between request handlers. Bounded: once
/// `limit` entries are held, each new one evicts the oldest. The CSV audit
/// log keeps the full record.
pub struct CommandHistory {
    entries: Mutex<VecDeque<HistoryEntry>>,
    limit: usize,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub fn add(&self, username: &str, operation: &str, details: &str, was_error: bool) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.limit {
            entries.pop_front();
        }
        entries.push_back(HistoryEntry {
            timestamp: Local::now(),
            username: username.to_string(),
            operation: operation.to_string(),
            details: details.to_string(),
            was_error,
        });
    }

    pub fn entries_for_user(&self, username: &str) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.username == username)
            .cloned()
            .collect()
    }

    pub fn all_entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Drops every entry of `username`. Returns how many were removed.
    pub fn clear_user(&self, username: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.username != username);
        before - entries.len()
    }

    /// Report over everyone's entries, or only `username`'s.
    pub fn report(&self, username: Option<&str>) -> CommandReport {
        let entries = match username {
            Some(user) => self.entries_for_user(user),
            None => self.all_entries(),
        };
        CommandReport::from_entries(entries)
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for CommandHistory {
    fn record(&self, username: &str, operation: &str, details: &str, was_error: bool) {
        self.add(username, operation, details, was_error);
    }
}

#[derive(Debug, Serialize)]
struct AuditRow<'a> {
    timestamp: String,
    username: &'a str,
    operation: &'a str,
    details: &'a str,
    was_error: bool,
}

/// One audit record as read back for the admin log report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub username: String,
    pub operation: String,
    pub details: String,
    pub was_error: bool,
}

impl AuditRecord {
    /// Outcome as shown to clients: `OK: <details>` or `ERROR: <details>`.
    pub fn response(&self) -> String {
        let status = if self.was_error { "ERROR" } else { "OK" };
        if self.details.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, self.details)
        }
    }
}

impl From<&HistoryEntry> for AuditRecord {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            timestamp: entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            username: entry.username.clone(),
            operation: entry.operation.clone(),
            details: entry.details.clone(),
            was_error: entry.was_error,
        }
    }
}

/// Narrows the admin log report. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Exact username.
    pub user: Option<String>,
    /// Substring of [`AuditRecord::response`], case-sensitive.
    pub response: Option<String>,
}

impl LogFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        let user_ok = match self.user.as_deref() {
            Some(user) if !user.is_empty() => record.username == user,
            _ => true,
        };
        let response_ok = match self.response.as_deref() {
            Some(text) if !text.is_empty() => record.response().contains(text),
            _ => true,
        };
        user_ok && response_ok
    }

    pub fn apply(&self, records: Vec<AuditRecord>) -> Vec<AuditRecord> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only CSV audit file with a header row.
pub struct CsvAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvAuditLog {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        info!("audit log at {}", path.display());
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, row: &AuditRow<'_>) -> Result<(), csv::Error> {
        let _guard = self.lock.lock();
        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads every record back, oldest first. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, csv::Error> {
        let _guard = self.lock.lock();
        if !self.path.exists() {
            debug!("audit log {} not written yet", self.path.display());
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        reader.deserialize().collect()
    }
}

impl AuditSink for CsvAuditLog {
    fn record(&self, username: &str, operation: &str, details: &str, was_error: bool) {
        let row = AuditRow {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            username,
            operation,
            details,
            was_error,
        };
        if let Err(e) = self.append(&row) {
            error!("failed to write audit record to {}: {}", self.path.display(), e);
        }
    }
}

/// Forwards every record to several sinks.
pub struct FanOut {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl FanOut {
    pub fn new(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanOut {
    fn record(&self, username: &str, operation: &str, details: &str, was_error: bool) {
        for sink in &self.sinks {
            sink.record(username, operation, details, was_error);
        }
    }
}

impl<T: AuditSink + ?Sized> AuditSink for std::sync::Arc<T> {
    fn record(&self, username: &str, operation: &str, details: &str, was_error: bool) {
        (**self).record(username, operation, details, was_error)
    }
}
