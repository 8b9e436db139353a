// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # warden-std
//!
//! Durable storage for the `warden-core` audit log.
//!
//! This crate provides [`FileAuditStore`], an append-only JSON Lines
//! implementation of the [`AuditStore`](warden_core::storage::AuditStore)
//! trait that syncs every record to disk before acknowledging it, and
//! [`verify_file`] for checking a log offline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warden_core::{default_rules, GovernanceEngine};
//! use warden_std::FileAuditStore;
//!
//! let store = FileAuditStore::open("/var/lib/warden/audit.jsonl")
//!     .expect("failed to open audit log");
//!
//! let engine = GovernanceEngine::builder()
//!     .rules(default_rules())
//!     .store(store)
//!     .build()
//!     .expect("engine");
//! ```

use std::path::Path;

use warden_core::audit::verify_records;
use warden_core::error::AuditError;
use warden_core::types::ChainReport;

pub mod storage;

pub use storage::file::FileAuditStore;

/// Read the audit log at `path` and verify its hash chain.
///
/// The file is opened read-only; a torn final line is skipped, not repaired.
///
/// # Errors
///
/// [`AuditError::Io`] or [`AuditError::Serialization`] if the file cannot be
/// read, and [`AuditError::IntegrityViolation`] on the first broken link.
pub fn verify_file(path: impl AsRef<Path>) -> Result<ChainReport, AuditError> {
    let records = storage::file::read_records(path.as_ref())?.records;
    verify_records(&records)
}
