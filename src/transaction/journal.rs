//! Append-only audit journal of finalized transactions.
//!
//! One JSON line per committed or rolled-back transaction. The journal is an
//! audit trail, not a recovery log: write failures are reported to the caller
//! (the manager logs them) and never change a transaction's outcome.

use crate::models::{IndexError, Result};
use crate::transaction::TransactionSnapshot;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// JSONL journal file.
pub struct TransactionJournal {
    path: PathBuf,
    /// Serializes appends from concurrent transactions
    writer: Mutex<()>,
}

impl TransactionJournal {
    /// Open (or create) a journal, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| IndexError::io("creating journal dir", e))?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| IndexError::io("opening journal", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(()),
        })
    }

    /// Append one finalized transaction.
    pub fn append(&self, snapshot: &TransactionSnapshot) -> Result<()> {
        let line = serde_json::to_string(snapshot)
            .map_err(|e| IndexError::Internal(format!("Serializing transaction: {e}")))?;

        let _guard = self
            .writer
            .lock()
            .map_err(|_| IndexError::Internal("Journal lock poisoned".to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| IndexError::io("opening journal", e))?;
        writeln!(file, "{line}").map_err(|e| IndexError::io("appending to journal", e))?;
        file.flush()
            .map_err(|e| IndexError::io("flushing journal", e))?;

        debug!(tx_id = %snapshot.transaction_id, "Journal entry written");
        Ok(())
    }

    /// Load every journaled transaction, oldest first.
    pub fn read_all(&self) -> Result<Vec<TransactionSnapshot>> {
        let file = File::open(&self.path).map_err(|e| IndexError::io("opening journal", e))?;
        let reader = BufReader::new(file);
        let mut snapshots = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| IndexError::io("reading journal", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let snapshot: TransactionSnapshot = serde_json::from_str(&line).map_err(|e| {
                IndexError::ParseError(format!("Journal line {}: {}", line_num + 1, e))
            })?;
            snapshots.push(snapshot);
        }

        Ok(snapshots)
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Transaction, TransactionStatus};
    use tempfile::TempDir;

    fn finished(id: &str, status: TransactionStatus) -> TransactionSnapshot {
        let mut tx = Transaction::new(id.to_string(), format!("doc-{id}"));
        tx.status = status;
        tx.end_time = Some(chrono::Utc::now());
        tx.snapshot()
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("audit").join("tx.jsonl");
        let journal = TransactionJournal::open(&path).unwrap();

        journal
            .append(&finished("tx1", TransactionStatus::Committed))
            .unwrap();
        journal
            .append(&finished("tx2", TransactionStatus::RolledBack))
            .unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].transaction_id, "tx1");
        assert_eq!(entries[1].status, TransactionStatus::RolledBack);
    }

    #[test]
    fn test_reopen_keeps_existing_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.jsonl");

        TransactionJournal::open(&path)
            .unwrap()
            .append(&finished("tx1", TransactionStatus::Committed))
            .unwrap();

        let journal = TransactionJournal::open(&path).unwrap();
        assert_eq!(journal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_line_names_line_number() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tx.jsonl");
        let journal = TransactionJournal::open(&path).unwrap();
        journal
            .append(&finished("tx1", TransactionStatus::Committed))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        let err = journal.read_all().unwrap_err();
        assert!(err.to_string().contains("Journal line 2"));
    }
}
