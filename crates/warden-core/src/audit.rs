// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Audit log management.
//!
//! [`AuditLogger`] exposes two core operations:
//!
//! * [`append`](AuditLogger::append): durably record a decision and its verdict
//! * [`query`](AuditLogger::query)  : search / filter the log in sequence order
//!
//! Records are chained via SHA-256 hashes to form a tamper-evident log.
//! Appends are serialised through a single writer lock so sequence numbers
//! form a total order of commit completion.  Queries read a separate index
//! and never wait for storage I/O.
//!
//! ## Faults and gaps
//!
//! A failed storage write marks the logger *faulted*: the sequence number it
//! was given is consumed and every later append is refused with
//! [`AuditError::Faulted`].  If an operator [`resume`](AuditLogger::resume)s
//! the logger, the next record skips the consumed number and the resulting
//! gap is reported by [`gaps`](AuditLogger::gaps) and
//! [`verify`](AuditLogger::verify).

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AuditError;
use crate::storage::AuditStore;
use crate::types::{
    AuditFilter, AuditRecord, ChainReport, Decision, SequenceGap, ValidationResult, GENESIS_HASH,
};

/// Records decisions in a chained, tamper-evident audit log.
///
/// # Examples
///
/// ```rust
/// use warden_core::audit::AuditLogger;
/// use warden_core::storage::InMemoryAuditStore;
/// use warden_core::types::{AuditFilter, Decision, DecisionType, ValidationResult, VerdictReason};
///
/// let logger = AuditLogger::open(Box::new(InMemoryAuditStore::new())).unwrap();
///
/// let decision = Decision::new("agent-001", DecisionType::TaskExecution, "send_report");
/// let result = ValidationResult {
///     decision_id: decision.id,
///     approved: true,
///     reason: VerdictReason::Approved,
///     risk_score: 0.0,
///     outcomes: Vec::new(),
///     reasoning: "No rule raised a concern.".into(),
///     timestamp_ms: 1_000,
///     registry_version: 1,
/// };
///
/// let record = logger.append(&decision, &result, 1_000).unwrap();
/// assert_eq!(record.sequence, 1);
/// assert_eq!(logger.query(&AuditFilter::default()).len(), 1);
/// assert!(logger.verify().unwrap().is_gapless());
/// ```
pub struct AuditLogger {
    writer: Mutex<AuditWriter>,
    index: RwLock<AuditIndex>,
}

struct AuditWriter {
    store: Box<dyn AuditStore>,
    next_sequence: u64,
    /// Hash of the most recently appended record (genesis = 64 zeros).
    last_hash: String,
    /// Sequence number whose write failed, if any.
    faulted: Option<u64>,
}

#[derive(Default)]
struct AuditIndex {
    records: Vec<AuditRecord>,
    by_decision: hashbrown::HashMap<Uuid, usize>,
    gaps: Vec<SequenceGap>,
}

impl AuditIndex {
    fn push(&mut self, record: AuditRecord) {
        let expected = self.records.last().map_or(1, |last| last.sequence + 1);
        if record.sequence != expected {
            let gap = SequenceGap { after: expected - 1, next: record.sequence };
            error!(after = gap.after, next = gap.next, "audit sequence gap");
            self.gaps.push(gap);
        }
        self.by_decision.insert(record.decision.id, self.records.len());
        self.records.push(record);
    }
}

impl AuditLogger {
    /// Open a logger over `store`, recovering any records it already holds.
    ///
    /// # Errors
    ///
    /// * Any error raised by [`AuditStore::load`].
    /// * [`AuditError::IntegrityViolation`] if the stored chain does not verify.
    pub fn open(mut store: Box<dyn AuditStore>) -> Result<Self, AuditError> {
        let records = store.load()?;
        let report = verify_records(&records)?;
        if !report.gaps.is_empty() {
            error!(gaps = report.gaps.len(), "recovered audit log has sequence gaps");
        }
        if !records.is_empty() {
            info!(records = report.records, tip = %report.tip, "audit log recovered");
        }

        let next_sequence = records.last().map_or(1, |last| last.sequence + 1);
        let mut index = AuditIndex::default();
        for record in records {
            index.push(record);
        }

        Ok(Self {
            writer: Mutex::new(AuditWriter {
                store,
                next_sequence,
                last_hash: report.tip,
                faulted: None,
            }),
            index: RwLock::new(index),
        })
    }

    /// Durably append `decision` and its `result`.
    ///
    /// Returns only after the store has acknowledged the write.
    ///
    /// # Errors
    ///
    /// * [`AuditError::Faulted`] if an earlier append failed.
    /// * [`AuditError::DuplicateDecision`] if `decision` already has a record.
    ///   Nothing is written and the logger stays healthy.
    /// * The store's error if this write fails; the logger is then faulted.
    pub fn append(
        &self,
        decision: &Decision,
        result: &ValidationResult,
        recorded_at_ms: u64,
    ) -> Result<AuditRecord, AuditError> {
        let mut writer = self.writer.lock();
        if let Some(sequence) = writer.faulted {
            return Err(AuditError::Faulted { sequence });
        }
        // Checked under the writer lock so concurrent submissions of one id
        // cannot both pass.
        if self.index.read().by_decision.contains_key(&decision.id) {
            return Err(AuditError::DuplicateDecision { decision_id: decision.id });
        }

        let sequence = writer.next_sequence;
        let hash = compute_hash(sequence, &writer.last_hash, recorded_at_ms, decision, result)?;
        let record = AuditRecord {
            sequence,
            decision: decision.clone(),
            result: result.clone(),
            prev_hash: writer.last_hash.clone(),
            hash,
            recorded_at_ms,
        };

        writer.next_sequence += 1;
        if let Err(err) = writer.store.append(&record) {
            writer.faulted = Some(sequence);
            error!(sequence, error = %err, "audit append failed; log is now faulted");
            return Err(err);
        }
        writer.last_hash = record.hash.clone();

        // Publish while still holding the writer lock so the index stays in
        // sequence order.
        self.index.write().push(record.clone());
        Ok(record)
    }

    /// Return all records that satisfy `filter`, in sequence order.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        self.index
            .read()
            .records
            .iter()
            .filter(|record| filter.matches(record))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Whether `decision_id` already has a record.
    pub fn contains(&self, decision_id: Uuid) -> bool {
        self.index.read().by_decision.contains_key(&decision_id)
    }

    /// The record for `decision_id`.
    pub fn record_for(&self, decision_id: Uuid) -> Option<AuditRecord> {
        let index = self.index.read();
        index
            .by_decision
            .get(&decision_id)
            .map(|&position| index.records[position].clone())
    }

    pub fn len(&self) -> usize {
        self.index.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().records.is_empty()
    }

    /// The hash of the most recently appended record.
    pub fn chain_tip(&self) -> String {
        self.writer.lock().last_hash.clone()
    }

    /// Sequence gaps observed in the log, oldest first.
    pub fn gaps(&self) -> Vec<SequenceGap> {
        self.index.read().gaps.clone()
    }

    /// The sequence number whose write failed, if the logger is faulted.
    pub fn fault(&self) -> Option<u64> {
        self.writer.lock().faulted
    }

    /// Accept appends again after a storage fault has been repaired.
    ///
    /// The failed sequence number stays consumed.  Returns it, or `None` if
    /// the logger was not faulted.
    pub fn resume(&self) -> Option<u64> {
        let lost = self.writer.lock().faulted.take();
        if let Some(sequence) = lost {
            warn!(sequence, "audit log resumed after fault; sequence left as a gap");
        }
        lost
    }

    /// Re-verify the hash chain of every record held by the logger.
    ///
    /// # Errors
    ///
    /// [`AuditError::IntegrityViolation`] on the first broken link.
    pub fn verify(&self) -> Result<ChainReport, AuditError> {
        verify_records(&self.index.read().records)
    }
}

// ---------------------------------------------------------------------------
// Hash chain implementation
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HashInput<'a> {
    sequence: u64,
    prev_hash: &'a str,
    recorded_at_ms: u64,
    decision: &'a Decision,
    result: &'a ValidationResult,
}

/// SHA-256 over the canonical JSON form of every field of a record except
/// `hash` itself, rendered as lowercase hex.
pub fn compute_hash(
    sequence: u64,
    prev_hash: &str,
    recorded_at_ms: u64,
    decision: &Decision,
    result: &ValidationResult,
) -> Result<String, AuditError> {
    let payload = serde_json::to_vec(&HashInput {
        sequence,
        prev_hash,
        recorded_at_ms,
        decision,
        result,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify a sequence of records as a chain starting from genesis.
///
/// Sequence numbers must strictly increase; jumps are reported as gaps.
/// Each `prev_hash` must equal the hash of the record before it, and each
/// `hash` must match the record's contents.
///
/// # Errors
///
/// [`AuditError::IntegrityViolation`] naming the first offending record.
pub fn verify_records(records: &[AuditRecord]) -> Result<ChainReport, AuditError> {
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut last_sequence = 0;
    let mut gaps = Vec::new();

    for record in records {
        if record.sequence <= last_sequence {
            return Err(AuditError::IntegrityViolation {
                sequence: record.sequence,
                expected: format!("sequence greater than {last_sequence}"),
                actual: record.sequence.to_string(),
            });
        }
        if record.sequence != last_sequence + 1 {
            gaps.push(SequenceGap { after: last_sequence, next: record.sequence });
        }
        if record.prev_hash != prev_hash {
            return Err(AuditError::IntegrityViolation {
                sequence: record.sequence,
                expected: prev_hash,
                actual: record.prev_hash.clone(),
            });
        }
        let computed = compute_hash(
            record.sequence,
            &record.prev_hash,
            record.recorded_at_ms,
            &record.decision,
            &record.result,
        )?;
        if computed != record.hash {
            return Err(AuditError::IntegrityViolation {
                sequence: record.sequence,
                expected: computed,
                actual: record.hash.clone(),
            });
        }
        prev_hash = record.hash.clone();
        last_sequence = record.sequence;
    }

    Ok(ChainReport { records: records.len(), gaps, tip: prev_hash })
}
