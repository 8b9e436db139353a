// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Storage abstraction for the audit log.
//!
//! The [`AuditStore`] trait is the single interface between the audit logger
//! and any persistence layer.  This crate ships [`InMemoryAuditStore`] for
//! development, testing, and WASM hosts.  Durable implementations live in
//! downstream crates (see `warden-std`'s `FileAuditStore`).
//!
//! # Implementing `AuditStore`
//!
//! ```rust,no_run
//! use warden_core::error::AuditError;
//! use warden_core::storage::AuditStore;
//! use warden_core::types::AuditRecord;
//!
//! struct MyStore;
//!
//! impl AuditStore for MyStore {
//!     fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
//!         // write durably, then return
//!         Ok(())
//!     }
//!     fn load(&mut self) -> Result<Vec<AuditRecord>, AuditError> {
//!         Ok(Vec::new())
//!     }
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AuditError;
use crate::types::AuditRecord;

/// Pluggable persistence for audit records.
///
/// The logger serialises every call, so implementations need only be
/// [`Send`].  `append` must not return until the record is durable: the
/// engine hands a verdict back to its caller only after `append` succeeds.
pub trait AuditStore: Send {
    /// Durably append one record.
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Read back every stored record in append order.
    ///
    /// Called once when the logger is opened.
    fn load(&mut self) -> Result<Vec<AuditRecord>, AuditError>;
}

/// A volatile [`AuditStore`] backed by a shared vector.
///
/// Clones share the same underlying records, so a test can keep a handle,
/// drop the engine, and open a new engine over the same "storage".
///
/// # Examples
///
/// ```rust
/// use warden_core::storage::{AuditStore, InMemoryAuditStore};
///
/// let mut store = InMemoryAuditStore::new();
/// let handle = store.clone();
/// assert!(store.load().unwrap().is_empty());
/// assert!(handle.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditStore {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from pre-existing records, e.g. an exported log.
    pub fn from_records(records: Vec<AuditRecord>) -> Self {
        Self { records: Arc::new(Mutex::new(records)) }
    }

    /// Copy of everything stored so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self.records.lock().clone())
    }
}
