// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Decision validator: the evaluation pipeline behind `validate`.
//!
//! ## Evaluation Order
//!
//! 1. **Ingestion**: a structurally malformed decision is recorded as a
//!    rejection and reported as [`EngineError::InvalidDecision`].
//! 2. **Emergency gate**: while halted every decision is rejected with
//!    `SystemHalted`, without evaluating rules.
//! 3. **Rules**: every rule in the snapshot that is relevant to the decision
//!    type is evaluated.  There is no short-circuit: the reasoning lists every
//!    issue.
//! 4. **Resources**: requested resources are checked (without committing)
//!    against the budget of the team, or of the agent when no team is named.
//! 5. **Verdict**: a failed critical rule rejects outright; otherwise
//!    exhausted resources reject; otherwise the risk score is compared with
//!    the threshold.
//! 6. **Reservation**: an approved decision's resources are reserved
//!    atomically.  Losing a race for the last headroom turns the verdict into
//!    `ResourceExhausted`.
//! 7. **Audit**: the decision and verdict are appended while transitions of
//!    the emergency state are held off.  If a halt was recorded while the
//!    decision was being evaluated, the verdict becomes `SystemHalted`.  If
//!    the append fails the reservation is released and the error is
//!    returned.
//!
//! A decision id is recorded at most once; resubmitting a recorded decision
//! is an [`EngineError::InvalidDecision`] and leaves the log untouched.
//!
//! The result is returned only once its audit record is durable.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::audit::AuditLogger;
use crate::clock::Clock;
use crate::emergency::EmergencyController;
use crate::error::{AuditError, EngineError, ResourceError, Result};
use crate::registry::{ConstraintRegistry, RuleSnapshot};
use crate::resources::ResourceArbiter;
use crate::risk::RiskScorer;
use crate::types::{
    AuditRecord, Decision, EmergencyState, EmergencyStatus, OutcomeKind, RuleOutcome, Severity,
    ValidationResult, VerdictReason,
};

/// Runs the evaluation pipeline over shared engine components.
pub struct DecisionValidator {
    registry: Arc<ConstraintRegistry>,
    arbiter: Arc<ResourceArbiter>,
    emergency: Arc<EmergencyController>,
    audit: Arc<AuditLogger>,
    scorer: RiskScorer,
    clock: Arc<dyn Clock>,
}

impl DecisionValidator {
    pub fn new(
        registry: Arc<ConstraintRegistry>,
        arbiter: Arc<ResourceArbiter>,
        emergency: Arc<EmergencyController>,
        audit: Arc<AuditLogger>,
        scorer: RiskScorer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { registry, arbiter, emergency, audit, scorer, clock }
    }

    pub fn scorer(&self) -> &RiskScorer {
        &self.scorer
    }

    /// Evaluate `decision` and record the verdict.
    ///
    /// # Errors
    ///
    /// * [`EngineError::InvalidDecision`] for a malformed decision, after its
    ///   rejection has been recorded, or for a decision whose id already has
    ///   a record.
    /// * [`EngineError::Audit`] when the audit log cannot record the verdict.
    pub fn validate(&self, decision: &Decision) -> Result<ValidationResult> {
        ensure_unrecorded(&self.audit, decision)?;
        let snapshot = self.registry.current_snapshot();
        let timestamp_ms = self.clock.now_ms();

        if let Err(reason) = decision.check_well_formed() {
            let result = rejection(
                decision,
                &snapshot,
                timestamp_ms,
                VerdictReason::InvalidDecision,
                format!("Rejected: invalid decision ({reason})."),
            );
            append_once(&self.audit, &decision.recordable(), &result, timestamp_ms)?;
            warn!(decision_id = %decision.id, agent = %decision.agent_id, %reason, "invalid decision");
            return Err(EngineError::InvalidDecision { decision_id: decision.id, reason });
        }

        if self.emergency.is_halted() {
            let result = halted(decision, &snapshot, timestamp_ms, &self.emergency.state());
            self.record(decision, &result, timestamp_ms)?;
            return Ok(result);
        }

        let mut outcomes = self.evaluate_rules(&snapshot, decision);
        let key = decision.budget_key();
        let availability = self.arbiter.check(key, &decision.resources_required);
        if !availability.granted {
            outcomes.push(RuleOutcome::resource_exhausted(key, &availability.shortfalls));
        }

        let risk_score = self.scorer.score(&outcomes);
        let mut reason = self.verdict(&outcomes, risk_score);

        let mut reserved = false;
        if reason == VerdictReason::Approved && !decision.resources_required.is_empty() {
            match self.arbiter.reserve(key, &decision.resources_required) {
                Ok(()) => reserved = true,
                Err(ResourceError::Exhausted { shortfalls, .. }) => {
                    outcomes.push(RuleOutcome::resource_exhausted(key, &shortfalls));
                    reason = VerdictReason::ResourceExhausted;
                }
                Err(other) => return Err(other.into()),
            }
        }

        let result = ValidationResult {
            decision_id: decision.id,
            approved: reason == VerdictReason::Approved,
            reason,
            risk_score,
            reasoning: reasoning(reason, risk_score, self.scorer.threshold(), &outcomes),
            outcomes,
            timestamp_ms,
            registry_version: snapshot.version(),
        };

        let (result, recorded) = self.emergency.with_state(|state| {
            let result = match state.status {
                EmergencyStatus::Halted => halted(decision, &snapshot, timestamp_ms, state),
                EmergencyStatus::Normal => result,
            };
            let recorded = self.record(decision, &result, timestamp_ms);
            (result, recorded)
        });

        if reserved && !(recorded.is_ok() && result.approved) {
            // Only a recorded approval may keep its reservation.
            if let Err(release_err) = self.arbiter.release(key, &decision.resources_required) {
                error!(key, error = %release_err, "could not roll back reservation");
            }
        }
        recorded?;
        Ok(result)
    }

    /// Evaluate every relevant rule of `snapshot` against `decision`.
    pub fn evaluate_rules(&self, snapshot: &RuleSnapshot, decision: &Decision) -> Vec<RuleOutcome> {
        snapshot
            .applicable_to(decision.decision_type)
            .into_iter()
            .map(|rule| rule.evaluate(decision))
            .collect()
    }

    fn verdict(&self, outcomes: &[RuleOutcome], risk_score: f64) -> VerdictReason {
        let critical_rule_failed = outcomes.iter().any(|outcome| {
            outcome.kind == OutcomeKind::Rule
                && outcome.severity == Severity::Critical
                && outcome.failed()
        });
        if critical_rule_failed {
            return VerdictReason::ConstraintViolation;
        }
        if outcomes
            .iter()
            .any(|outcome| outcome.kind == OutcomeKind::Resource && outcome.failed())
        {
            return VerdictReason::ResourceExhausted;
        }
        if self.scorer.exceeds_threshold(risk_score) {
            return VerdictReason::RiskThresholdExceeded;
        }
        VerdictReason::Approved
    }

    fn record(
        &self,
        decision: &Decision,
        result: &ValidationResult,
        timestamp_ms: u64,
    ) -> Result<AuditRecord> {
        let record = append_once(&self.audit, decision, result, timestamp_ms)?;
        if result.approved {
            debug!(sequence = record.sequence, decision_id = %decision.id,
                risk = result.risk_score, "decision approved");
        } else {
            warn!(sequence = record.sequence, decision_id = %decision.id,
                agent = %decision.agent_id, reason = %result.reason, "decision rejected");
        }
        Ok(record)
    }
}

/// Refuse a decision whose id already has an audit record.
pub(crate) fn ensure_unrecorded(audit: &AuditLogger, decision: &Decision) -> Result<()> {
    if audit.contains(decision.id) {
        return Err(duplicate(decision));
    }
    Ok(())
}

/// Append a record, reporting a repeated decision id as an invalid decision.
pub(crate) fn append_once(
    audit: &AuditLogger,
    decision: &Decision,
    result: &ValidationResult,
    timestamp_ms: u64,
) -> Result<AuditRecord> {
    match audit.append(decision, result, timestamp_ms) {
        Err(AuditError::DuplicateDecision { .. }) => Err(duplicate(decision)),
        other => Ok(other?),
    }
}

fn duplicate(decision: &Decision) -> EngineError {
    warn!(decision_id = %decision.id, agent = %decision.agent_id, "decision already recorded");
    EngineError::InvalidDecision {
        decision_id: decision.id,
        reason: "decision id is already recorded".into(),
    }
}

fn halted(
    decision: &Decision,
    snapshot: &RuleSnapshot,
    timestamp_ms: u64,
    state: &EmergencyState,
) -> ValidationResult {
    rejection(
        decision,
        snapshot,
        timestamp_ms,
        VerdictReason::SystemHalted,
        format!(
            "Rejected: system halted ({}).",
            state.reason.as_deref().unwrap_or("no reason given")
        ),
    )
}

/// A verdict that carries no rule outcomes.
pub(crate) fn rejection(
    decision: &Decision,
    snapshot: &RuleSnapshot,
    timestamp_ms: u64,
    reason: VerdictReason,
    reasoning: String,
) -> ValidationResult {
    ValidationResult {
        decision_id: decision.id,
        approved: false,
        reason,
        risk_score: 0.0,
        outcomes: Vec::new(),
        reasoning,
        timestamp_ms,
        registry_version: snapshot.version(),
    }
}

fn reasoning(reason: VerdictReason, risk: f64, threshold: f64, outcomes: &[RuleOutcome]) -> String {
    let headline = match reason {
        VerdictReason::Approved => format!("Approved: risk {risk:.3} is below threshold {threshold}."),
        VerdictReason::ConstraintViolation => "Rejected: a critical constraint failed.".to_string(),
        VerdictReason::ResourceExhausted => "Rejected: requested resources are not available.".to_string(),
        VerdictReason::RiskThresholdExceeded => {
            format!("Rejected: risk {risk:.3} reaches threshold {threshold}.")
        }
        other => format!("Rejected: {other}."),
    };

    let issues: Vec<String> = outcomes
        .iter()
        .filter(|outcome| outcome.failed())
        .map(|outcome| {
            format!(
                "[{}] {}/{}: {}",
                outcome.rule_id, outcome.category, outcome.severity, outcome.explanation
            )
        })
        .collect();

    if issues.is_empty() {
        headline
    } else {
        format!("{headline} {}", issues.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{AutoHaltPolicy, BudgetDefinition, CategoryWeights};
    use crate::rules::{default_rules, RuleCheck, RuleDefinition};
    use crate::storage::InMemoryAuditStore;
    use crate::types::{Category, DecisionType, EmergencyStatus};

    struct Fixture {
        validator: DecisionValidator,
        audit: Arc<AuditLogger>,
        arbiter: Arc<ResourceArbiter>,
        emergency: Arc<EmergencyController>,
    }

    fn fixture(rules: Vec<RuleDefinition>) -> Fixture {
        let registry = Arc::new(ConstraintRegistry::new(rules, 4).unwrap());
        let arbiter = Arc::new(ResourceArbiter::new(true));
        let emergency = Arc::new(EmergencyController::new(AutoHaltPolicy::default(), 0));
        let audit = Arc::new(AuditLogger::open(Box::new(InMemoryAuditStore::new())).unwrap());
        let validator = DecisionValidator::new(
            registry,
            Arc::clone(&arbiter),
            Arc::clone(&emergency),
            Arc::clone(&audit),
            RiskScorer::new(CategoryWeights::default(), 0.7),
            Arc::new(ManualClock::new(1_000)),
        );
        Fixture { validator, audit, arbiter, emergency }
    }

    fn warn_rule(id: &str, field: &str) -> RuleDefinition {
        RuleDefinition::new(
            id,
            Category::Transparency,
            Severity::Medium,
            RuleCheck::Present { field: field.into() },
        )
    }

    #[test]
    fn all_failures_are_listed_in_reasoning() {
        let f = fixture(vec![warn_rule("t.one", "a"), warn_rule("t.two", "b")]);
        let decision = Decision::new("agent", DecisionType::TaskExecution, "go");
        let result = f.validator.validate(&decision).unwrap();
        assert!(!result.approved);
        assert_eq!(result.reason, VerdictReason::RiskThresholdExceeded);
        assert!(result.reasoning.contains("[t.one]"));
        assert!(result.reasoning.contains("[t.two]"));
        assert_eq!(result.outcomes.len(), 2);
    }

    #[test]
    fn score_below_threshold_approves_with_warnings() {
        let mut rules = vec![warn_rule("t.one", "a")];
        rules.push(
            RuleDefinition::new(
                "t.heavy",
                Category::Transparency,
                Severity::High,
                RuleCheck::Present { field: "b".into() },
            )
            .weighted(3.0),
        );
        let f = fixture(rules);
        let decision = Decision::new("agent", DecisionType::TaskExecution, "go").with_context("b", true);
        let result = f.validator.validate(&decision).unwrap();
        // 0.5 / 3.5 ≈ 0.14
        assert!(result.approved);
        assert!(result.risk_score < 0.2);
        assert!(result.reasoning.contains("[t.one]"));
    }

    #[test]
    fn malformed_decision_is_audited_then_reported() {
        let f = fixture(default_rules());
        let decision = Decision::new("agent", DecisionType::Communication, "send");
        let err = f.validator.validate(&decision).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDecision { decision_id, .. } if decision_id == decision.id));
        let record = f.audit.record_for(decision.id).unwrap();
        assert_eq!(record.result.reason, VerdictReason::InvalidDecision);
    }

    #[test]
    fn non_finite_context_is_invalid_and_recorded_without_it() {
        let f = fixture(default_rules());
        let decision = Decision::new("agent", DecisionType::TaskExecution, "score")
            .with_context("confidence", f64::NAN)
            .with_context("explanation", "batch");
        let err = f.validator.validate(&decision).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDecision { ref reason, .. } if reason.contains("confidence")));

        let record = f.audit.record_for(decision.id).unwrap();
        assert!(!record.decision.context.contains_key("confidence"));
        assert!(record.decision.context.contains_key("explanation"));
        let line = serde_json::to_string(&record).unwrap();
        let parsed: AuditRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn resubmission_is_refused_and_releases_nothing() {
        let f = fixture(Vec::new());
        f.arbiter
            .define_budget(BudgetDefinition::new("team-x").ceiling("memory_mb", 1024.0))
            .unwrap();
        let decision = Decision::new("agent", DecisionType::ResourceRequest, "alloc")
            .with_team("team-x")
            .with_resource("memory_mb", 512.0);
        assert!(f.validator.validate(&decision).unwrap().approved);
        assert!(matches!(
            f.validator.validate(&decision),
            Err(EngineError::InvalidDecision { decision_id, .. }) if decision_id == decision.id
        ));
        assert_eq!(f.audit.len(), 1);
        assert_eq!(f.arbiter.usage("team-x").unwrap().committed("memory_mb"), 512.0);
    }

    #[test]
    fn halted_system_rejects_without_evaluating() {
        let f = fixture(default_rules());
        f.emergency
            .transition(EmergencyStatus::Halted, Some("drill".into()), "ops", 1, |_| Ok(()))
            .unwrap();
        let decision = Decision::new("agent", DecisionType::TaskExecution, "go");
        let result = f.validator.validate(&decision).unwrap();
        assert_eq!(result.reason, VerdictReason::SystemHalted);
        assert!(result.outcomes.is_empty());
        assert!(result.reasoning.contains("drill"));
        assert_eq!(f.audit.len(), 1);
    }

    #[test]
    fn approval_commits_reservation_against_team_budget() {
        let f = fixture(Vec::new());
        f.arbiter
            .define_budget(BudgetDefinition::new("team-x").ceiling("memory_mb", 1024.0))
            .unwrap();
        let alloc = || {
            Decision::new("agent", DecisionType::ResourceRequest, "alloc")
                .with_team("team-x")
                .with_resource("memory_mb", 512.0)
        };
        assert!(f.validator.validate(&alloc()).unwrap().approved);
        assert!(f.validator.validate(&alloc()).unwrap().approved);
        let third = f.validator.validate(&alloc()).unwrap();
        assert_eq!(third.reason, VerdictReason::ResourceExhausted);
        assert!(third.cites(crate::types::RESOURCE_RULE_ID));
        assert_eq!(f.arbiter.usage("team-x").unwrap().committed("memory_mb"), 1024.0);
    }
}
