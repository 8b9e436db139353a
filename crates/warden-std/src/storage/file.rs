// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! File-based JSON Lines audit store.
//!
//! [`FileAuditStore`] appends one JSON-encoded
//! [`AuditRecord`](warden_core::types::AuditRecord) per line.  Each append is
//! flushed and `fsync`ed (`sync_data`) before it is acknowledged, so a record
//! the engine has reported is on disk.  An append that fails at any step is
//! truncated away again, so a record the engine was told failed never
//! reappears on the next load.
//!
//! ## Crash recovery
//!
//! A crash in the middle of an append can leave a partial final line.  That
//! record was never acknowledged, so on [`load`](AuditStore::load) the torn
//! line is logged, dropped, and truncated away before new records are
//! appended.  A malformed line anywhere else is corruption and fails the
//! load.
//!
//! ## Caveats
//!
//! * Concurrent writers from multiple processes are not supported.
//! * The whole log is read into memory when the engine opens it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};
use warden_core::error::AuditError;
use warden_core::storage::AuditStore;
use warden_core::types::AuditRecord;

/// A durable, append-only [`AuditStore`] backed by a JSON Lines file.
///
/// # Examples
///
/// ```rust,no_run
/// use warden_core::storage::AuditStore;
/// use warden_std::storage::file::FileAuditStore;
///
/// let mut store = FileAuditStore::open("/tmp/warden-audit.jsonl")
///     .expect("could not open audit log");
/// let existing = store.load().expect("could not read audit log");
/// println!("{} records on disk", existing.len());
/// ```
#[derive(Debug)]
pub struct FileAuditStore {
    path: PathBuf,
    file: File,
}

impl FileAuditStore {
    /// Open the log at `path`, creating it (and missing parent directories)
    /// if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file or its directory cannot be
    /// created or opened for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditStore for FileAuditStore {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        let line = encode(record)?;
        self.write_line(&line, File::sync_data)
    }

    fn load(&mut self) -> Result<Vec<AuditRecord>, AuditError> {
        let contents = read_records(&self.path)?;
        if let Some(valid_len) = contents.torn_at {
            // Drop the unacknowledged tail so the next append starts on a
            // fresh line.
            self.file.set_len(valid_len)?;
            self.file.sync_data()?;
        }
        debug!(path = %self.path.display(), records = contents.records.len(), "audit log loaded");
        Ok(contents.records)
    }
}

impl FileAuditStore {
    /// Write `line` and make it durable with `sync`, or leave the file as it
    /// was before the call.
    fn write_line<S>(&mut self, line: &[u8], sync: S) -> Result<(), AuditError>
    where
        S: FnOnce(&File) -> io::Result<()>,
    {
        let start = self.file.metadata()?.len();
        let written = self
            .file
            .write_all(line)
            .and_then(|()| self.file.flush())
            .and_then(|()| sync(&self.file));

        if let Err(err) = written {
            if let Err(rollback) = self.file.set_len(start).and_then(|()| self.file.sync_data()) {
                error!(path = %self.path.display(), offset = start, error = %rollback,
                    "could not truncate failed audit append");
            }
            return Err(err.into());
        }
        Ok(())
    }
}

fn encode(record: &AuditRecord) -> Result<Vec<u8>, AuditError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

/// Records read from a log file.
pub(crate) struct LogContents {
    pub(crate) records: Vec<AuditRecord>,
    /// Byte length of the valid prefix when the final line was torn.
    pub(crate) torn_at: Option<u64>,
}

/// Parse every line of the log at `path` without modifying it.
pub(crate) fn read_records(path: &Path) -> Result<LogContents, AuditError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(LogContents { records: Vec::new(), torn_at: None });
        }
        Err(err) => return Err(err.into()),
    };

    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset = 0u64;
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Ok(LogContents { records, torn_at: None });
        }

        let terminated = line.ends_with('\n');
        let body = line.trim_end();
        if body.is_empty() {
            offset += read as u64;
            continue;
        }

        match serde_json::from_str::<AuditRecord>(body) {
            Ok(record) if terminated => records.push(record),
            // A complete JSON object without its newline is still torn: the
            // append was not acknowledged.
            Ok(_) => return Ok(torn(path, records, offset)),
            Err(_) if !terminated => return Ok(torn(path, records, offset)),
            Err(err) => {
                warn!(path = %path.display(), offset, error = %err, "corrupt audit log line");
                return Err(err.into());
            }
        }
        offset += read as u64;
    }
}

fn torn(path: &Path, records: Vec<AuditRecord>, offset: u64) -> LogContents {
    warn!(
        path = %path.display(),
        offset,
        recovered = records.len(),
        "discarding torn final audit record"
    );
    LogContents { records, torn_at: Some(offset) }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use warden_core::audit::{verify_records, AuditLogger};
    use warden_core::types::{
        Decision, DecisionType, SequenceGap, ValidationResult, VerdictReason,
    };

    fn result_for(decision: &Decision) -> ValidationResult {
        ValidationResult {
            decision_id: decision.id,
            approved: true,
            reason: VerdictReason::Approved,
            risk_score: 0.125,
            outcomes: Vec::new(),
            reasoning: "Approved.".into(),
            timestamp_ms: 1_000,
            registry_version: 1,
        }
    }

    fn write_records(path: &Path, count: u64) {
        let logger = AuditLogger::open(Box::new(FileAuditStore::open(path).unwrap())).unwrap();
        for i in 0..count {
            let decision = Decision::new(format!("agent-{i}"), DecisionType::TaskExecution, "read");
            logger.append(&decision, &result_for(&decision), 1_000 + i).unwrap();
        }
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        write_records(&path, 3);

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn reopened_log_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        write_records(&path, 2);
        write_records(&path, 2);

        let mut store = FileAuditStore::open(&path).unwrap();
        let records = store.load().unwrap();
        let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, [1, 2, 3, 4]);
        assert_eq!(records[2].prev_hash, records[1].hash);
    }

    #[test]
    fn torn_tail_is_dropped_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        write_records(&path, 2);
        let intact_len = fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence":3,"decision":{"#).unwrap();
        drop(file);

        let mut store = FileAuditStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        // The next writer picks up cleanly after the repaired tail.
        write_records(&path, 1);
        let reloaded = FileAuditStore::open(&path).unwrap().load().unwrap();
        assert_eq!(reloaded.last().map(|r| r.sequence), Some(3));
    }

    #[test]
    fn complete_but_malformed_line_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        write_records(&path, 1);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();
        drop(file);

        let mut store = FileAuditStore::open(&path).unwrap();
        assert!(matches!(store.load(), Err(AuditError::Serialization(_))));
    }

    /// Fails the sync step of the next append while `fail_sync` is set.
    struct SyncFailingStore {
        inner: FileAuditStore,
        fail_sync: Arc<AtomicBool>,
    }

    impl AuditStore for SyncFailingStore {
        fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
            if !self.fail_sync.swap(false, Ordering::SeqCst) {
                return self.inner.append(record);
            }
            let line = encode(record)?;
            self.inner
                .write_line(&line, |_| Err(io::Error::other("fsync failed")))
        }

        fn load(&mut self) -> Result<Vec<AuditRecord>, AuditError> {
            self.inner.load()
        }
    }

    #[test]
    fn failed_sync_leaves_no_bytes_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        write_records(&path, 1);
        let intact_len = fs::metadata(&path).unwrap().len();

        let mut store = FileAuditStore::open(&path).unwrap();
        let err = store
            .write_line(br#"{"sequence":2,"decision":"#, |_| Err(io::Error::other("fsync failed")))
            .unwrap_err();
        assert!(matches!(err, AuditError::Io(_)));
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
    }

    #[test]
    fn resumed_log_after_failed_sync_reopens_with_a_gap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let fail_sync = Arc::new(AtomicBool::new(false));
        let logger = AuditLogger::open(Box::new(SyncFailingStore {
            inner: FileAuditStore::open(&path).unwrap(),
            fail_sync: Arc::clone(&fail_sync),
        }))
        .unwrap();

        let append = |agent: &str, at: u64| {
            let decision = Decision::new(agent, DecisionType::TaskExecution, "read");
            logger.append(&decision, &result_for(&decision), at)
        };
        append("agent-1", 1).unwrap();
        fail_sync.store(true, Ordering::SeqCst);
        assert!(matches!(append("agent-2", 2), Err(AuditError::Io(_))));
        assert_eq!(logger.resume(), Some(2));
        assert_eq!(append("agent-3", 3).unwrap().sequence, 3);
        drop(logger);

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
        let records = FileAuditStore::open(&path).unwrap().load().unwrap();
        let report = verify_records(&records).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.gaps, vec![SequenceGap { after: 1, next: 3 }]);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let contents = read_records(&dir.path().join("absent.jsonl")).unwrap();
        assert!(contents.records.is_empty());
        assert!(contents.torn_at.is_none());
    }
}
