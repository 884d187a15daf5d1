//! Durable history of iteration records
//!
//! The history is a single JSON array on disk, rewritten in full after every
//! orchestrator call. Loading upgrades legacy entries and repairs nested
//! records (see [`migrate`]); a file that can't be parsed at all is copied to
//! `<file>.bak` and the bot starts over with an empty history rather than
//! refusing to run. Single entries that don't map onto a record are dropped,
//! after the same backup, and the rest are kept.
//!
//! There is no cross-process locking: one process owns a history file.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{HistoryError, PersistenceError};
use crate::types::IterationRecord;

pub mod format;
pub mod migrate;

/// Ordered, append-only list of iteration records backed by a file
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: Vec<IterationRecord>,
}

impl RecordStore {
    /// An empty store that will persist to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Load the store from `path`
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Read` if the file exists but can't be read and
    /// `HistoryError::Backup` if a corrupt file can't be backed up. A corrupt
    /// file is otherwise not an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let records = Self::load(&path)?;
        info!("Loaded {} history records from {}", records.len(), path.display());
        Ok(Self { path, records })
    }

    /// Read, migrate and repair the history at `path`
    ///
    /// A missing file is an empty history.
    pub fn load(path: &Path) -> Result<Vec<IterationRecord>, HistoryError> {
        if !path.is_file() {
            debug!("No history at {}, starting empty", path.display());
            return Ok(Vec::new());
        }

        let bytes = std::fs::read(path).map_err(|source| HistoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        match parse_history(path, &bytes) {
            Ok(parsed) if parsed.skipped.is_empty() => Ok(parsed.records),
            Ok(parsed) => {
                let backup = back_up(path)?;
                for reason in &parsed.skipped {
                    warn!("Dropping unreadable history {}", reason);
                }
                warn!(
                    "Kept {} of {} history entries. Full former history available in {}",
                    parsed.records.len(),
                    parsed.records.len() + parsed.skipped.len(),
                    backup.display()
                );
                Ok(parsed.records)
            }
            Err(corrupt) => {
                let backup = back_up(path)?;
                error!(
                    "{}, starting a new history. Former history available in {}",
                    corrupt,
                    backup.display()
                );
                Ok(Vec::new())
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    /// Add a record in memory; call [`RecordStore::persist`] to save it
    pub fn append(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    /// Rewrite the whole history file
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Create` if the file doesn't exist and can't
    /// be created, `PersistenceError::Write` if it can't be written.
    pub fn persist(&self) -> Result<(), PersistenceError> {
        if !self.path.is_file() {
            std::fs::File::create(&self.path).map_err(|source| PersistenceError::Create {
                path: self.path.clone(),
                source,
            })?;
        }

        let value = serde_json::to_value(&self.records)?;
        let contents = format::to_history_string(&value)?;

        std::fs::write(&self.path, contents).map_err(|source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        })?;

        debug!(
            "Persisted {} history records to {}",
            self.records.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// `<file>.bak` next to `path`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn back_up(path: &Path) -> Result<PathBuf, HistoryError> {
    let backup = backup_path(path);
    std::fs::copy(path, &backup).map_err(|source| HistoryError::Backup {
        path: backup.clone(),
        source,
    })?;
    Ok(backup)
}

/// Entries that loaded, plus a reason for each one that didn't
#[derive(Debug, Default)]
struct ParsedHistory {
    records: Vec<IterationRecord>,
    skipped: Vec<String>,
}

/// Parse a history file
///
/// Only a file that isn't a JSON list is corrupt. A list element that
/// doesn't map onto a record is skipped so the rest of the history survives.
fn parse_history(path: &Path, bytes: &[u8]) -> Result<ParsedHistory, HistoryError> {
    let corrupt = |reason: String| HistoryError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
    let Value::Array(entries) = value else {
        return Err(corrupt("top level is not a list".to_string()));
    };

    let mut parsed = ParsedHistory::default();
    for (i, entry) in entries.into_iter().enumerate() {
        match migrate::migrate_entry(entry) {
            Ok(record) => parsed.records.push(record),
            Err(reason) => parsed.skipped.push(format!("entry {}: {}", i, reason)),
        }
    }
    Ok(parsed)
}
