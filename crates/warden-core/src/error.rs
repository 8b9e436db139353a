// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Error types for the governance engine.
//!
//! Only structural and administrative failures are errors.  Business outcomes
//! of evaluating a decision (a violated rule, an exhausted budget, a halted
//! system) travel inside [`ValidationResult`](crate::types::ValidationResult)
//! so that the audit trail captures them.

use thiserror::Error;
use uuid::Uuid;

use crate::auth::Permission;
use crate::types::{EmergencyStatus, Shortfall};

/// Failures of the append-only audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backing store could not be read or written.
    #[error("audit storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialised or a stored line could not be parsed.
    #[error("audit serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stored hash chain does not verify.
    #[error("integrity check failed at sequence {sequence}: expected {expected}, got {actual}")]
    IntegrityViolation {
        sequence: u64,
        expected: String,
        actual: String,
    },

    /// The decision already has a record; each decision is recorded once.
    #[error("decision {decision_id} is already recorded")]
    DuplicateDecision { decision_id: Uuid },

    /// A previous append failed; the log accepts no further records.
    #[error("audit log is faulted after a storage failure at sequence {sequence}")]
    Faulted { sequence: u64 },
}

/// A rule set, budget definition, or engine configuration is malformed.
///
/// Always fatal to the operation that raised it; the previously active state
/// remains in effect.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("rule '{rule_id}' is missing required field '{field}'")]
    MissingField { rule_id: String, field: &'static str },

    #[error("rule id '{0}' appears more than once in the rule set")]
    DuplicateRule(String),

    #[error("rule '{rule_id}' is invalid: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("budget '{key}' is invalid: {reason}")]
    InvalidBudget { key: String, reason: String },

    #[error("field \"{field}\": value \"{value}\" out of range: {reason}")]
    InvalidRange {
        field: String,
        value: String,
        reason: String,
    },

    #[error("field \"{field}\": cannot parse \"{value}\": {reason}")]
    ParseField {
        field: String,
        value: String,
        reason: String,
    },

    #[error("failed to read config file \"{path}\": {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[cfg(feature = "config-loader")]
    #[error("failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to parse JSON config: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Failures of the resource arbiter.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The request does not fit in the remaining headroom of the budget.
    #[error("resources exhausted for '{key}': {}", describe_shortfalls(.shortfalls))]
    Exhausted {
        key: String,
        shortfalls: Vec<Shortfall>,
    },

    /// A requested or released amount is negative or not finite.
    #[error("invalid amount {amount} for dimension '{dimension}'")]
    InvalidAmount { dimension: String, amount: f64 },

    /// A new ceiling would sit below usage that is already committed.
    #[error("ceiling {ceiling} for '{key}.{dimension}' is below committed usage {committed}")]
    CeilingBelowCommitted {
        key: String,
        dimension: String,
        ceiling: f64,
        committed: f64,
    },
}

/// Top-level error returned by [`GovernanceEngine`](crate::engine::GovernanceEngine)
/// operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The submitted decision is malformed, or its id was already recorded.
    /// Either way the decision has a record in the audit log by the time
    /// this is returned from `validate`.
    #[error("invalid decision {decision_id}: {reason}")]
    InvalidDecision { decision_id: Uuid, reason: String },

    /// The principal lacks the role required for an administrative call.
    #[error("principal '{principal}' is not authorised to {permission}")]
    Unauthorized {
        principal: String,
        permission: Permission,
    },

    /// The emergency state machine cannot make the requested transition.
    #[error("cannot move emergency state to {attempted}: already {current}")]
    InvalidTransition {
        current: EmergencyStatus,
        attempted: EmergencyStatus,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Audit durability failed.  Fatal to the engine.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// A background validation task did not complete.
    #[error("validation worker failed: {0}")]
    Worker(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

fn describe_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(|s| format!("{} requested {} available {}", s.dimension, s.requested, s.available))
        .collect::<Vec<_>>()
        .join(", ")
}
