// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Governance engine: the top-level composition of all components.
//!
//! [`GovernanceEngine`] owns one instance of each component for the lifetime
//! of the process: the constraint registry, resource arbiter, emergency
//! controller, audit logger, and the validator that drives them.  Components
//! are shared through `Arc`s and synchronise internally, so every method
//! takes `&self` and the engine can be shared across threads as
//! `Arc<GovernanceEngine>`.
//!
//! ## Administrative calls
//!
//! `trigger_halt`, `lift_halt`, `reload_constraints`, `define_budget` and
//! `resume_audit` check the caller's role first.  A denied call is logged and
//! returns [`EngineError::Unauthorized`]; nothing is recorded.  A permitted
//! call is recorded in the audit log as an `administrative` decision whose
//! `agent_id` is the principal.
//!
//! ## The lift action
//!
//! While halted, `validate` rejects every decision except
//! [`Decision::lift_request`], which bypasses the rule pipeline and lifts the
//! halt if its principal (the decision's `agent_id`) is authorised.  Unlike
//! `lift_halt`, a refused lift request still produces an audited verdict.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::audit::AuditLogger;
use crate::auth::{AccessPolicy, Permission, SYSTEM_PRINCIPAL};
use crate::clock::{Clock, SystemClock};
use crate::config::{BudgetDefinition, EngineConfig};
use crate::emergency::EmergencyController;
use crate::error::{AuditError, EngineError, Result};
use crate::registry::ConstraintRegistry;
use crate::resources::ResourceArbiter;
use crate::risk::RiskScorer;
use crate::rules::{default_rules, RuleDefinition};
use crate::storage::{AuditStore, InMemoryAuditStore};
use crate::types::{
    AuditFilter, AuditRecord, ChainReport, ContextValue, Decision, DecisionType, EmergencyState,
    EmergencyStatus, ResourceBudget, ResourceMap, ValidationResult, VerdictReason,
};
use crate::validator::{append_once, ensure_unrecorded, DecisionValidator};

/// Action labels of engine-recorded administrative events.
pub mod actions {
    pub const HALT: &str = "emergency.halt";
    pub const LIFT: &str = crate::types::LIFT_ACTION;
    pub const RELOAD: &str = "constraints.reload";
    pub const DEFINE_BUDGET: &str = "budget.define";
    pub const RESUME_AUDIT: &str = "audit.resume";
}

/// Composes all governance components into a single API.
///
/// # Construction
///
/// ```rust
/// use warden_core::auth::{AccessPolicy, Role};
/// use warden_core::config::{BudgetDefinition, EngineConfig};
/// use warden_core::engine::GovernanceEngine;
/// use warden_core::rules::default_rules;
///
/// let engine = GovernanceEngine::builder()
///     .config(EngineConfig::default())
///     .rules(default_rules())
///     .access(AccessPolicy::default().with_grant("admin-1", Role::Administrator))
///     .budget(BudgetDefinition::new("team-a").ceiling("cpu_percent", 100.0))
///     .build()
///     .unwrap();
/// assert_eq!(engine.registry_version(), 1);
/// ```
///
/// # Evaluation
///
/// ```rust
/// use warden_core::engine::GovernanceEngine;
/// use warden_core::types::{Decision, DecisionType};
///
/// let engine = GovernanceEngine::with_defaults().unwrap();
///
/// let decision = Decision::new("agent-001", DecisionType::TaskExecution, "process_user_data")
///     .with_context("personal_data", false)
///     .with_context("consent", true)
///     .with_resource("cpu_percent", 30.0);
///
/// let result = engine.validate(&decision).unwrap();
/// assert!(result.approved);
/// assert!(result.risk_score < 0.3);
/// ```
pub struct GovernanceEngine {
    config: EngineConfig,
    access: AccessPolicy,
    registry: Arc<ConstraintRegistry>,
    arbiter: Arc<ResourceArbiter>,
    emergency: Arc<EmergencyController>,
    audit: Arc<AuditLogger>,
    validator: DecisionValidator,
    clock: Arc<dyn Clock>,
}

impl GovernanceEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// An engine with default configuration, the built-in rule set, no
    /// budgets, no privileged principals, and in-memory audit storage.
    pub fn with_defaults() -> Result<Self> {
        Self::builder().rules(default_rules()).build()
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Validate a decision and return its verdict.
    ///
    /// Each decision id gets exactly one audit record.  The verdict is
    /// returned only once that record is durable.
    ///
    /// # Errors
    ///
    /// * [`EngineError::InvalidDecision`] for a malformed decision (its
    ///   rejection is still recorded), or for a decision that was already
    ///   validated (its first record stands and nothing new is written).
    /// * [`EngineError::Audit`] when the audit log cannot record the verdict.
    pub fn validate(&self, decision: &Decision) -> Result<ValidationResult> {
        if decision.is_lift_request() {
            ensure_unrecorded(&self.audit, decision)?;
            return self.validate_lift(decision);
        }

        let outcome = self.validator.validate(decision);
        match &outcome {
            Ok(result) => self.observe(!result.approved),
            Err(EngineError::InvalidDecision { .. }) => self.observe(true),
            Err(_) => {}
        }
        outcome
    }

    fn validate_lift(&self, decision: &Decision) -> Result<ValidationResult> {
        let now = self.clock.now_ms();
        let principal = decision.agent_id.as_str();
        let refusal = if !self.access.is_allowed(principal, Permission::LiftHalt) {
            warn!(principal, "lift request from unauthorised principal");
            Some((VerdictReason::Unauthorized, format!("Rejected: '{principal}' may not lift a halt.")))
        } else if !self.emergency.is_halted() {
            Some((VerdictReason::InvalidTransition, "Rejected: the system is not halted.".to_string()))
        } else {
            None
        };

        if let Some((reason, reasoning)) = refusal {
            let result = self.admin_result(decision, false, reason, reasoning, now);
            append_once(&self.audit, decision, &result, now)?;
            return Ok(result);
        }

        let lifted = self.admin_result(
            decision,
            true,
            VerdictReason::Administrative,
            format!("Emergency halt lifted by '{principal}'."),
            now,
        );
        let transition = self.emergency.transition(EmergencyStatus::Normal, None, principal, now, |_| {
            self.audit.append(decision, &lifted, now).map(|_| ())
        });

        match transition {
            Ok(_) => Ok(lifted),
            // A concurrent lift got there first.
            Err(EngineError::InvalidTransition { .. }) => {
                let result = self.admin_result(
                    decision,
                    false,
                    VerdictReason::InvalidTransition,
                    "Rejected: the system is not halted.".into(),
                    now,
                );
                append_once(&self.audit, decision, &result, now)?;
                Ok(result)
            }
            Err(err) => Err(err),
        }
    }

    fn observe(&self, rejected: bool) {
        let now = self.clock.now_ms();
        let Some(rate) = self.emergency.observe(rejected, now) else {
            return;
        };
        let reason = format!(
            "auto-halt: rejection rate {:.2} exceeded {:.2} over {} ms",
            rate, self.config.auto_halt.max_rejection_rate, self.config.auto_halt.window_ms
        );
        match self.halt(reason, SYSTEM_PRINCIPAL) {
            Ok(_) | Err(EngineError::InvalidTransition { .. }) => {}
            Err(err) => error!(error = %err, "auto-halt could not be recorded"),
        }
    }

    // ------------------------------------------------------------------
    // Administrative calls
    // ------------------------------------------------------------------

    /// Halt the system.  Requires [`Permission::TriggerHalt`].
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`], [`EngineError::InvalidTransition`] if
    /// already halted, or [`EngineError::Audit`].
    pub fn trigger_halt(&self, reason: &str, principal: &str) -> Result<EmergencyState> {
        self.access.authorize(principal, Permission::TriggerHalt)?;
        self.halt(reason.to_string(), principal)
    }

    fn halt(&self, reason: String, principal: &str) -> Result<EmergencyState> {
        let now = self.clock.now_ms();
        self.emergency
            .transition(EmergencyStatus::Halted, Some(reason.clone()), principal, now, |_| {
                self.record_admin(principal, actions::HALT, [("reason", reason.as_str().into())], now)
            })
    }

    /// Lift a halt.  Requires [`Permission::LiftHalt`].
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`], [`EngineError::InvalidTransition`] if
    /// not halted, or [`EngineError::Audit`].
    pub fn lift_halt(&self, principal: &str) -> Result<EmergencyState> {
        self.access.authorize(principal, Permission::LiftHalt)?;
        let now = self.clock.now_ms();
        self.emergency
            .transition(EmergencyStatus::Normal, None, principal, now, |_| {
                self.record_admin(principal, actions::LIFT, [], now)
            })
    }

    /// Publish a new rule set and return its version.  Requires
    /// [`Permission::ReloadConstraints`].
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`], [`EngineError::Configuration`] for a
    /// malformed rule set (the previous version stays active), or
    /// [`EngineError::Audit`].
    pub fn reload_constraints(&self, rules: Vec<RuleDefinition>, principal: &str) -> Result<u64> {
        self.access.authorize(principal, Permission::ReloadConstraints)?;
        let now = self.clock.now_ms();
        self.registry.reload_with(rules, |version, count| {
            self.record_admin(
                principal,
                actions::RELOAD,
                [("version", (version as f64).into()), ("rules", (count as f64).into())],
                now,
            )
            .map_err(EngineError::from)
        })
    }

    /// Define or redefine a resource budget.  Requires
    /// [`Permission::DefineBudget`].
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`], [`EngineError::Configuration`] or
    /// [`EngineError::Resource`] for a definition the arbiter refuses, or
    /// [`EngineError::Audit`].  On any error the budget is unchanged.
    pub fn define_budget(&self, budget: BudgetDefinition, principal: &str) -> Result<()> {
        self.access.authorize(principal, Permission::DefineBudget)?;
        let key = budget.key.clone();
        let now = self.clock.now_ms();
        self.arbiter.define_budget_with(budget, || {
            self.record_admin(principal, actions::DEFINE_BUDGET, [("key", key.as_str().into())], now)
                .map_err(EngineError::from)
        })
    }

    /// Accept audit appends again after a storage fault.  Requires
    /// [`Permission::ResumeAudit`].
    ///
    /// Returns the sequence number lost to the fault, which the log reports
    /// as a gap.  Fails with [`EngineError::Audit`] if the store is still
    /// broken, in which case the log faults again.
    pub fn resume_audit(&self, principal: &str) -> Result<Option<u64>> {
        self.access.authorize(principal, Permission::ResumeAudit)?;
        let lost = self.audit.resume();
        if let Some(sequence) = lost {
            self.record_admin(
                principal,
                actions::RESUME_AUDIT,
                [("lost_sequence", (sequence as f64).into())],
                self.clock.now_ms(),
            )?;
        }
        Ok(lost)
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Reserve resources directly, outside a validation.
    pub fn reserve_resources(&self, key: &str, resources: &ResourceMap) -> Result<()> {
        Ok(self.arbiter.reserve(key, resources)?)
    }

    /// Return resources, typically once an approved action has finished.
    pub fn release_resources(&self, key: &str, resources: &ResourceMap) -> Result<()> {
        Ok(self.arbiter.release(key, resources)?)
    }

    pub fn resource_usage(&self, key: &str) -> Option<ResourceBudget> {
        self.arbiter.usage(key)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Query the audit log in sequence order.
    pub fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        self.audit.query(filter)
    }

    /// The audit record of `decision_id`, if one was written.
    pub fn audit_record(&self, decision_id: uuid::Uuid) -> Option<AuditRecord> {
        self.audit.record_for(decision_id)
    }

    /// Re-verify the audit hash chain and report any sequence gaps.
    pub fn audit_integrity(&self) -> Result<ChainReport> {
        Ok(self.audit.verify()?)
    }

    pub fn emergency_state(&self) -> EmergencyState {
        self.emergency.state()
    }

    pub fn is_halted(&self) -> bool {
        self.emergency.is_halted()
    }

    pub fn registry_version(&self) -> u64 {
        self.registry.version()
    }

    pub fn registry(&self) -> &ConstraintRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn admin_result(
        &self,
        decision: &Decision,
        approved: bool,
        reason: VerdictReason,
        reasoning: String,
        now: u64,
    ) -> ValidationResult {
        ValidationResult {
            decision_id: decision.id,
            approved,
            reason,
            risk_score: 0.0,
            outcomes: Vec::new(),
            reasoning,
            timestamp_ms: now,
            registry_version: self.registry.version(),
        }
    }

    fn record_admin<const N: usize>(
        &self,
        principal: &str,
        action: &str,
        details: [(&str, ContextValue); N],
        now: u64,
    ) -> std::result::Result<(), AuditError> {
        let mut decision = Decision::new(principal, DecisionType::Administrative, action);
        for (key, value) in details {
            decision.context.insert(key.into(), value);
        }
        let result = self.admin_result(
            &decision,
            true,
            VerdictReason::Administrative,
            format!("{action} by '{principal}'."),
            now,
        );
        self.audit.append(&decision, &result, now)?;
        info!(principal, action, "administrative action recorded");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`GovernanceEngine`].
///
/// Defaults: [`EngineConfig::default`], no rules, no privileged principals,
/// no budgets, [`InMemoryAuditStore`], [`SystemClock`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    rules: Vec<RuleDefinition>,
    access: AccessPolicy,
    budgets: Vec<BudgetDefinition>,
    store: Option<Box<dyn AuditStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rules(mut self, rules: Vec<RuleDefinition>) -> Self {
        self.rules = rules;
        self
    }

    pub fn rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn access(mut self, access: AccessPolicy) -> Self {
        self.access = access;
        self
    }

    pub fn budget(mut self, budget: BudgetDefinition) -> Self {
        self.budgets.push(budget);
        self
    }

    pub fn store(mut self, store: impl AuditStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration, compile the rules, recover the audit log,
    /// and start the engine in the `Normal` state.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] for invalid configuration, rules or
    /// budgets; [`EngineError::Audit`] if the stored audit log cannot be
    /// loaded or fails verification.
    pub fn build(self) -> Result<GovernanceEngine> {
        let EngineBuilder { config, rules, access, budgets, store, clock } = self;
        config.validate()?;

        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let registry = Arc::new(ConstraintRegistry::new(rules, config.registry_history)?);
        let arbiter = Arc::new(ResourceArbiter::new(config.pass_on_missing_budget));
        for budget in budgets {
            arbiter.define_budget(budget)?;
        }
        let store = store.unwrap_or_else(|| Box::new(InMemoryAuditStore::new()));
        let audit = Arc::new(AuditLogger::open(store)?);
        let emergency = Arc::new(EmergencyController::new(config.auto_halt.clone(), clock.now_ms()));
        let validator = DecisionValidator::new(
            Arc::clone(&registry),
            Arc::clone(&arbiter),
            Arc::clone(&emergency),
            Arc::clone(&audit),
            RiskScorer::new(config.category_weights, config.risk_threshold),
            Arc::clone(&clock),
        );

        info!(
            rules = registry.current_snapshot().len(),
            threshold = config.risk_threshold,
            recovered = audit.len(),
            "governance engine started"
        );

        Ok(GovernanceEngine {
            config,
            access,
            registry,
            arbiter,
            emergency,
            audit,
            validator,
            clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::clock::ManualClock;
    use crate::config::AutoHaltPolicy;

    fn engine() -> GovernanceEngine {
        GovernanceEngine::builder()
            .rules(default_rules())
            .access(
                AccessPolicy::default()
                    .with_grant("admin-1", Role::Administrator)
                    .with_grant("oncall", Role::Operator),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn operator_may_halt_but_not_lift() {
        let engine = engine();
        engine.trigger_halt("incident", "oncall").unwrap();
        assert!(matches!(
            engine.lift_halt("oncall"),
            Err(EngineError::Unauthorized { permission: Permission::LiftHalt, .. })
        ));
        assert!(engine.is_halted());
        engine.lift_halt("admin-1").unwrap();
        assert!(!engine.is_halted());
    }

    #[test]
    fn denied_admin_calls_leave_no_record() {
        let engine = engine();
        assert!(engine.trigger_halt("x", "nobody").is_err());
        assert!(engine.reload_constraints(Vec::new(), "oncall").is_err());
        assert!(engine.query_audit(&AuditFilter::default()).is_empty());
    }

    #[test]
    fn transitions_are_audited_as_administrative_records() {
        let engine = engine();
        engine.trigger_halt("manual-stop", "admin-1").unwrap();
        engine.lift_halt("admin-1").unwrap();
        let records = engine.query_audit(&AuditFilter {
            decision_type: Some(DecisionType::Administrative),
            ..Default::default()
        });
        let actions: Vec<&str> = records.iter().map(|r| r.decision.action.as_str()).collect();
        assert_eq!(actions, [actions::HALT, actions::LIFT]);
        assert_eq!(records[0].decision.agent_id, "admin-1");
        assert_eq!(
            records[0].decision.context.get("reason"),
            Some(&ContextValue::Text("manual-stop".into()))
        );
    }

    #[test]
    fn lift_request_bypasses_pipeline_while_halted() {
        let engine = engine();
        engine.trigger_halt("drill", "admin-1").unwrap();

        let denied = engine.validate(&Decision::lift_request("oncall")).unwrap();
        assert_eq!(denied.reason, VerdictReason::Unauthorized);
        assert!(engine.is_halted());

        let lifted = engine.validate(&Decision::lift_request("admin-1")).unwrap();
        assert!(lifted.approved);
        assert!(!engine.is_halted());

        let again = engine.validate(&Decision::lift_request("admin-1")).unwrap();
        assert_eq!(again.reason, VerdictReason::InvalidTransition);
    }

    #[test]
    fn resubmitted_decision_keeps_its_first_record() {
        let engine = engine();
        let decision = Decision::new("agent-1", DecisionType::TaskExecution, "read_logs");
        let first = engine.validate(&decision).unwrap();

        assert!(matches!(
            engine.validate(&decision),
            Err(EngineError::InvalidDecision { decision_id, .. }) if decision_id == decision.id
        ));
        let records = engine.query_audit(&AuditFilter::default());
        assert_eq!(records.len(), 1);
        assert_eq!(engine.audit_record(decision.id).unwrap().result, first);
    }

    #[test]
    fn resubmitted_lift_request_is_refused() {
        let engine = engine();
        engine.trigger_halt("drill", "admin-1").unwrap();
        let lift = Decision::lift_request("admin-1");
        assert!(engine.validate(&lift).unwrap().approved);
        assert!(matches!(engine.validate(&lift), Err(EngineError::InvalidDecision { .. })));
        assert_eq!(engine.query_audit(&AuditFilter::default()).len(), 2);
    }

    #[test]
    fn reload_bumps_version_and_is_recorded() {
        let engine = engine();
        let version = engine.reload_constraints(Vec::new(), "admin-1").unwrap();
        assert_eq!(version, 2);
        let record = engine
            .query_audit(&AuditFilter { action: Some(actions::RELOAD.into()), ..Default::default() })
            .pop()
            .unwrap();
        assert_eq!(record.decision.context.get("version"), Some(&ContextValue::Number(2.0)));
    }

    #[test]
    fn auto_halt_trips_on_sustained_rejections() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = GovernanceEngine::builder()
            .config(EngineConfig {
                auto_halt: AutoHaltPolicy {
                    enabled: true,
                    window_ms: 10_000,
                    min_samples: 3,
                    max_rejection_rate: 0.5,
                },
                ..EngineConfig::default()
            })
            .rules(default_rules())
            .clock(clock.clone())
            .build()
            .unwrap();

        for _ in 0..3 {
            clock.advance(10);
            let harmful = Decision::new("agent-x", DecisionType::TaskExecution, "delete_all_data")
                .with_context("personal_data", true);
            engine.validate(&harmful).unwrap();
        }
        let state = engine.emergency_state();
        assert_eq!(state.status, EmergencyStatus::Halted);
        assert_eq!(state.principal.as_deref(), Some(SYSTEM_PRINCIPAL));
    }
}
