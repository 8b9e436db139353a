// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # warden-core
//!
//! Decision validation and governance engine for autonomous agents.
//!
//! Every decision an agent proposes is checked against a versioned set of
//! constraint rules, scored for aggregate risk, checked against resource
//! budgets, and recorded in a hash-chained audit log before its verdict is
//! returned.  An emergency controller can halt all approvals at once.
//!
//! ## Architecture
//!
//! ```text
//! GovernanceEngine
//!   ├── ConstraintRegistry   versioned, atomically swapped rule snapshots
//!   ├── DecisionValidator    the per-decision pipeline
//!   │     ├── RiskScorer     weighted aggregation of rule outcomes
//!   │     └── ResourceArbiter per-agent / per-team budgets, atomic reserve
//!   ├── EmergencyController  NORMAL ⇄ HALTED, optional auto-halt
//!   ├── AuditLogger          append-only SHA-256 chain over an AuditStore
//!   └── AccessPolicy         roles for administrative calls
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use warden_core::{Decision, DecisionType, GovernanceEngine, VerdictReason};
//!
//! let engine = GovernanceEngine::with_defaults().unwrap();
//!
//! let decision = Decision::new("agent-007", DecisionType::DataAccess, "export_records")
//!     .with_context("personal_data", true)
//!     .with_context("requested_by", "analyst-3");
//!
//! let result = engine.validate(&decision).unwrap();
//! assert!(!result.approved);
//! assert_eq!(result.reason, VerdictReason::ConstraintViolation);
//! assert!(result.cites("privacy.consent_required"));
//! ```
//!
//! ## Feature flags
//!
//! | Feature         | Default | Enables                                   |
//! |-----------------|---------|-------------------------------------------|
//! | `async`         | yes     | [`async_engine::AsyncGovernanceEngine`]   |
//! | `config-loader` | yes     | TOML and environment configuration loader |

pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod registry;
pub mod resources;
pub mod risk;
pub mod rules;
pub mod storage;
pub mod types;
pub mod validator;

#[cfg(feature = "async")]
pub mod async_engine;
#[cfg(feature = "config-loader")]
pub mod config_loader;

pub use auth::{AccessPolicy, Permission, Role};
pub use config::{BudgetDefinition, EngineConfig};
pub use engine::GovernanceEngine;
pub use error::{AuditError, ConfigurationError, EngineError, ResourceError};
pub use rules::{default_rules, RuleCheck, RuleDefinition};
pub use storage::{AuditStore, InMemoryAuditStore};
pub use types::{
    AuditFilter, AuditRecord, Category, ContextValue, Decision, DecisionType, EmergencyState,
    EmergencyStatus, Severity, ValidationResult, VerdictReason,
};
