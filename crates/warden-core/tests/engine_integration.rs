// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! End-to-end tests of the governance engine through its public API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use warden_core::auth::{AccessPolicy, Role};
use warden_core::clock::ManualClock;
use warden_core::config::BudgetDefinition;
use warden_core::engine::{actions, GovernanceEngine};
use warden_core::error::{AuditError, EngineError};
use warden_core::rules::{default_rules, RuleCheck, RuleDefinition};
use warden_core::storage::{AuditStore, InMemoryAuditStore};
use warden_core::types::{
    AuditFilter, AuditRecord, Category, Decision, DecisionType, EmergencyStatus, SequenceGap,
    Severity, VerdictReason,
};

fn admins() -> AccessPolicy {
    AccessPolicy::default().with_grant("admin-1", Role::Administrator)
}

fn engine_over(store: InMemoryAuditStore) -> GovernanceEngine {
    GovernanceEngine::builder()
        .rules(default_rules())
        .access(admins())
        .budget(BudgetDefinition::new("team-a").ceiling("cpu_percent", 100.0))
        .store(store)
        .build()
        .unwrap()
}

fn example_decision() -> Decision {
    Decision::new("agent-001", DecisionType::TaskExecution, "process_user_data")
        .with_context("personal_data", false)
        .with_context("consent", true)
        .with_resource("cpu_percent", 30.0)
}

// ---------------------------------------------------------------------------
// Worked examples
// ---------------------------------------------------------------------------

#[test]
fn benign_decision_is_approved_with_low_risk() {
    let engine = engine_over(InMemoryAuditStore::new());
    let result = engine.validate(&example_decision()).unwrap();
    assert!(result.approved);
    assert_eq!(result.reason, VerdictReason::Approved);
    assert!(result.risk_score < 0.3);
}

#[test]
fn personal_data_without_consent_cites_privacy_rule() {
    let engine = engine_over(InMemoryAuditStore::new());
    let decision = example_decision()
        .with_context("personal_data", true)
        .with_context("consent", false);
    let result = engine.validate(&decision).unwrap();
    assert!(!result.approved);
    assert_eq!(result.reason, VerdictReason::ConstraintViolation);
    assert!(result.cites("privacy.consent_required"));
    assert!(result.reasoning.contains("[privacy.consent_required]"));
}

#[test]
fn over_ceiling_request_commits_nothing() {
    let engine = engine_over(InMemoryAuditStore::new());
    let decision = Decision::new("agent-001", DecisionType::ResourceRequest, "train_model")
        .with_team("team-a")
        .with_resource("cpu_percent", 150.0);

    let result = engine.validate(&decision).unwrap();
    assert!(!result.approved);
    assert_eq!(result.reason, VerdictReason::ResourceExhausted);
    assert_eq!(engine.resource_usage("team-a").unwrap().committed("cpu_percent"), 0.0);
}

#[test]
fn halt_blocks_everything_until_lifted() {
    let engine = engine_over(InMemoryAuditStore::new());
    engine.trigger_halt("manual-stop", "admin-1").unwrap();

    let blocked = engine.validate(&example_decision()).unwrap();
    assert!(!blocked.approved);
    assert_eq!(blocked.reason, VerdictReason::SystemHalted);
    assert!(blocked.reasoning.contains("manual-stop"));

    engine.lift_halt("admin-1").unwrap();
    assert!(engine.validate(&example_decision()).unwrap().approved);
}

// ---------------------------------------------------------------------------
// Audit invariants
// ---------------------------------------------------------------------------

#[test]
fn every_verdict_has_exactly_one_matching_record() {
    let engine = engine_over(InMemoryAuditStore::new());
    let decisions = [
        example_decision(),
        example_decision().with_context("personal_data", true),
        Decision::new("agent-002", DecisionType::Communication, "send_email")
            .with_context("recipient", "ops@example.com"),
    ];
    for decision in &decisions {
        let result = engine.validate(decision).unwrap();
        let record = engine.audit_record(decision.id).unwrap();
        assert_eq!(record.result, result);
        assert_eq!(record.decision.id, decision.id);
    }
    let records = engine.query_audit(&AuditFilter::default());
    assert_eq!(records.len(), decisions.len());
    let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, [1, 2, 3]);
    assert!(engine.audit_integrity().unwrap().is_gapless());
}

#[test]
fn invalid_decision_is_recorded_before_the_error() {
    let engine = engine_over(InMemoryAuditStore::new());
    let missing_recipient = Decision::new("agent-003", DecisionType::Communication, "send_email");

    let err = engine.validate(&missing_recipient).unwrap_err();
    assert!(matches!(err, EngineError::InvalidDecision { decision_id, .. } if decision_id == missing_recipient.id));

    let record = engine.audit_record(missing_recipient.id).unwrap();
    assert_eq!(record.result.reason, VerdictReason::InvalidDecision);
    assert!(!record.result.approved);
}

#[test]
fn halted_system_accepts_only_the_lift_action() {
    let engine = engine_over(InMemoryAuditStore::new());
    engine.trigger_halt("incident-42", "admin-1").unwrap();

    for decision_type in [
        DecisionType::TaskExecution,
        DecisionType::Communication,
        DecisionType::DataAccess,
    ] {
        let decision = Decision::new("agent-9", decision_type, "anything")
            .with_context("recipient", "x")
            .with_context("personal_data", false);
        let result = engine.validate(&decision).unwrap();
        assert_eq!(result.reason, VerdictReason::SystemHalted, "{decision_type:?}");
        assert!(result.outcomes.is_empty());
    }

    let lifted = engine.validate(&Decision::lift_request("admin-1")).unwrap();
    assert!(lifted.approved);
    assert_eq!(lifted.reason, VerdictReason::Administrative);
    assert_eq!(engine.emergency_state().status, EmergencyStatus::Normal);
}

#[test]
fn critical_failure_rejects_even_at_low_aggregate_risk() {
    let mut rules = default_rules();
    rules.push(
        RuleDefinition::new(
            "safety.sandbox_required",
            Category::Safety,
            Severity::Critical,
            RuleCheck::Predicate { field: "sandboxed".into(), expected: true },
        )
        .weighted(0.01),
    );
    let engine = GovernanceEngine::builder().rules(rules).build().unwrap();

    let decision = example_decision().with_context("explanation", "routine");
    let result = engine.validate(&decision).unwrap();
    assert!(result.risk_score < 0.1);
    assert_eq!(result.reason, VerdictReason::ConstraintViolation);
    assert!(result.cites("safety.sandbox_required"));
}

#[test]
fn verdict_names_the_registry_version_it_used() {
    let engine = engine_over(InMemoryAuditStore::new());
    assert_eq!(engine.validate(&example_decision()).unwrap().registry_version, 1);

    engine.reload_constraints(Vec::new(), "admin-1").unwrap();
    let result = engine
        .validate(&example_decision().with_context("personal_data", true))
        .unwrap();
    assert_eq!(result.registry_version, 2);
    assert!(result.approved);
    assert!(engine.registry().snapshot_at(1).is_some());
}

#[test]
fn malformed_reload_keeps_previous_rules() {
    let engine = engine_over(InMemoryAuditStore::new());
    let broken = RuleDefinition {
        check: None,
        ..RuleDefinition::new(
            "harm.partial",
            Category::Harm,
            Severity::High,
            RuleCheck::Present { field: "x".into() },
        )
    };
    assert!(matches!(
        engine.reload_constraints(vec![broken], "admin-1"),
        Err(EngineError::Configuration(_))
    ));
    assert_eq!(engine.registry_version(), 1);
    assert!(engine
        .query_audit(&AuditFilter { action: Some(actions::RELOAD.into()), ..Default::default() })
        .is_empty());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_reservations_never_overcommit() {
    let engine = GovernanceEngine::builder()
        .budget(BudgetDefinition::new("team-a").ceiling("gpu_hours", 100.0))
        .build()
        .unwrap();

    let approved: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let engine = &engine;
                scope.spawn(move || {
                    let decision = Decision::new(format!("agent-{i}"), DecisionType::ResourceRequest, "train")
                        .with_team("team-a")
                        .with_resource("gpu_hours", 10.0);
                    engine.validate(&decision).unwrap().approved as usize
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(approved, 10);
    assert_eq!(engine.resource_usage("team-a").unwrap().committed("gpu_hours"), 100.0);

    let records = engine.query_audit(&AuditFilter::default());
    assert_eq!(records.len(), 32);
    assert!(records.windows(2).all(|pair| pair[1].sequence == pair[0].sequence + 1));
    assert_eq!(
        records.iter().filter(|r| r.result.reason == VerdictReason::ResourceExhausted).count(),
        22
    );
}

#[test]
fn halt_is_visible_to_every_thread_after_it_returns() {
    let engine = engine_over(InMemoryAuditStore::new());
    engine.trigger_halt("freeze", "admin-1").unwrap();
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let result = engine.validate(&example_decision()).unwrap();
                assert_eq!(result.reason, VerdictReason::SystemHalted);
            });
        }
    });
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[test]
fn restart_recovers_chain_and_starts_normal() {
    let store = InMemoryAuditStore::new();
    {
        let engine = engine_over(store.clone());
        engine.validate(&example_decision()).unwrap();
        engine.trigger_halt("before-restart", "admin-1").unwrap();
        assert!(engine.is_halted());
    }
    assert_eq!(store.len(), 2);

    let engine = engine_over(store.clone());
    assert!(!engine.is_halted());
    let result = engine.validate(&example_decision()).unwrap();
    assert!(result.approved);

    let records = engine.query_audit(&AuditFilter::default());
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].sequence, 3);
    assert_eq!(records[2].prev_hash, records[1].hash);
    assert!(engine.audit_integrity().unwrap().is_gapless());
}

#[test]
fn tampered_store_refuses_to_open() {
    let store = InMemoryAuditStore::new();
    engine_over(store.clone()).validate(&example_decision()).unwrap();

    let mut records = store.records();
    records[0].result.approved = false;
    let err = GovernanceEngine::builder()
        .store(InMemoryAuditStore::from_records(records))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::Audit(AuditError::IntegrityViolation { sequence: 1, .. })));
}

/// Store whose writes fail while `broken` is set.
struct SwitchableStore {
    inner: InMemoryAuditStore,
    broken: Arc<AtomicBool>,
}

impl AuditStore for SwitchableStore {
    fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(AuditError::Io(std::io::Error::other("disk unplugged")));
        }
        self.inner.append(record)
    }

    fn load(&mut self) -> Result<Vec<AuditRecord>, AuditError> {
        self.inner.load()
    }
}

#[test]
fn storage_fault_is_fatal_until_resumed() {
    let broken = Arc::new(AtomicBool::new(false));
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = GovernanceEngine::builder()
        .rules(default_rules())
        .access(admins())
        .budget(BudgetDefinition::new("team-a").ceiling("cpu_percent", 100.0))
        .store(SwitchableStore { inner: InMemoryAuditStore::new(), broken: Arc::clone(&broken) })
        .clock(clock)
        .build()
        .unwrap();

    engine.validate(&example_decision()).unwrap();

    broken.store(true, Ordering::SeqCst);
    let reserved = example_decision().with_team("team-a");
    assert!(matches!(engine.validate(&reserved), Err(EngineError::Audit(AuditError::Io(_)))));
    assert_eq!(engine.resource_usage("team-a").unwrap().committed("cpu_percent"), 0.0);

    broken.store(false, Ordering::SeqCst);
    assert!(matches!(
        engine.validate(&example_decision()),
        Err(EngineError::Audit(AuditError::Faulted { sequence: 2 }))
    ));

    assert_eq!(engine.resume_audit("admin-1").unwrap(), Some(2));
    assert!(engine.validate(&example_decision()).unwrap().approved);

    let report = engine.audit_integrity().unwrap();
    assert_eq!(report.gaps, [SequenceGap { after: 1, next: 3 }]);
}

#[test]
fn budget_definition_that_cannot_be_recorded_changes_nothing() {
    let broken = Arc::new(AtomicBool::new(false));
    let engine = GovernanceEngine::builder()
        .access(admins())
        .budget(BudgetDefinition::new("team-a").ceiling("cpu_percent", 100.0))
        .store(SwitchableStore { inner: InMemoryAuditStore::new(), broken: Arc::clone(&broken) })
        .build()
        .unwrap();

    broken.store(true, Ordering::SeqCst);
    let raised = BudgetDefinition::new("team-a").ceiling("cpu_percent", 500.0);
    assert!(matches!(
        engine.define_budget(raised, "admin-1"),
        Err(EngineError::Audit(AuditError::Io(_)))
    ));
    let fresh = BudgetDefinition::new("team-b").ceiling("cpu_percent", 50.0);
    assert!(matches!(engine.define_budget(fresh, "admin-1"), Err(EngineError::Audit(_))));

    assert_eq!(engine.resource_usage("team-a").unwrap().ceilings["cpu_percent"], 100.0);
    assert!(engine.resource_usage("team-b").is_none());
}

#[test]
fn no_approval_is_recorded_after_a_halt() {
    let engine = engine_over(InMemoryAuditStore::new());
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    engine.validate(&example_decision()).unwrap();
                }
            });
        }
        scope.spawn(|| {
            thread::yield_now();
            engine.trigger_halt("mid-flight", "admin-1").unwrap();
        });
    });

    let records = engine.query_audit(&AuditFilter::default());
    let halt_at = records
        .iter()
        .position(|r| r.decision.action == actions::HALT)
        .unwrap();
    assert!(records[..halt_at].iter().all(|r| r.result.approved));
    assert!(records[halt_at + 1..]
        .iter()
        .all(|r| r.result.reason == VerdictReason::SystemHalted));
}
