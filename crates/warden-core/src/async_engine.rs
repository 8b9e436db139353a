// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Async governance engine backed by Tokio.
//!
//! This module is only compiled when the `async` feature flag is enabled:
//!
//! ```toml
//! [dependencies]
//! warden-core = { version = "0.1", features = ["async"] }
//! ```
//!
//! # Design
//!
//! [`AsyncGovernanceEngine`] shares one [`GovernanceEngine`] behind an `Arc`
//! and runs every call that may touch audit storage on Tokio's blocking
//! pool.  A validation submitted through it is owned by the blocking task,
//! not by the caller's future: dropping the future (for example on a
//! timeout) does not cancel the validation, which still runs to completion
//! and is audited.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "async")]
//! # {
//! use warden_core::async_engine::AsyncGovernanceEngine;
//! use warden_core::engine::GovernanceEngine;
//! use warden_core::types::{Decision, DecisionType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = AsyncGovernanceEngine::new(GovernanceEngine::with_defaults().unwrap());
//!
//!     let decision = Decision::new("agent-001", DecisionType::TaskExecution, "read_logs");
//!     let result = engine.validate(decision).await.unwrap();
//!     assert!(result.approved);
//! }
//! # }
//! ```

#![cfg(feature = "async")]

use std::sync::Arc;

use crate::config::BudgetDefinition;
use crate::engine::GovernanceEngine;
use crate::error::{EngineError, Result};
use crate::rules::RuleDefinition;
use crate::types::{AuditFilter, AuditRecord, Decision, EmergencyState, ResourceMap, ValidationResult};

/// Cloneable async handle to a shared [`GovernanceEngine`].
#[derive(Clone)]
pub struct AsyncGovernanceEngine {
    inner: Arc<GovernanceEngine>,
}

impl AsyncGovernanceEngine {
    pub fn new(engine: GovernanceEngine) -> Self {
        Self { inner: Arc::new(engine) }
    }

    pub fn from_shared(engine: Arc<GovernanceEngine>) -> Self {
        Self { inner: engine }
    }

    /// Borrow the synchronous engine for non-blocking reads.
    pub fn engine(&self) -> &GovernanceEngine {
        &self.inner
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validate `decision` on the blocking pool.
    ///
    /// # Errors
    ///
    /// As [`GovernanceEngine::validate`], plus [`EngineError::Worker`] if the
    /// blocking task panicked or the runtime shut down.
    pub async fn validate(&self, decision: Decision) -> Result<ValidationResult> {
        self.run(move |engine| engine.validate(&decision)).await
    }

    // -----------------------------------------------------------------------
    // Administrative calls
    // -----------------------------------------------------------------------

    pub async fn trigger_halt(&self, reason: String, principal: String) -> Result<EmergencyState> {
        self.run(move |engine| engine.trigger_halt(&reason, &principal)).await
    }

    pub async fn lift_halt(&self, principal: String) -> Result<EmergencyState> {
        self.run(move |engine| engine.lift_halt(&principal)).await
    }

    pub async fn reload_constraints(
        &self,
        rules: Vec<RuleDefinition>,
        principal: String,
    ) -> Result<u64> {
        self.run(move |engine| engine.reload_constraints(rules, &principal)).await
    }

    pub async fn define_budget(&self, budget: BudgetDefinition, principal: String) -> Result<()> {
        self.run(move |engine| engine.define_budget(budget, &principal)).await
    }

    // -----------------------------------------------------------------------
    // Resources and inspection
    // -----------------------------------------------------------------------

    pub fn reserve_resources(&self, key: &str, resources: &ResourceMap) -> Result<()> {
        self.inner.reserve_resources(key, resources)
    }

    pub fn release_resources(&self, key: &str, resources: &ResourceMap) -> Result<()> {
        self.inner.release_resources(key, resources)
    }

    pub fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        self.inner.query_audit(filter)
    }

    pub fn emergency_state(&self) -> EmergencyState {
        self.inner.emergency_state()
    }

    async fn run<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&GovernanceEngine) -> Result<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || work(&engine))
            .await
            .map_err(|join| EngineError::Worker(join.to_string()))?
    }
}
