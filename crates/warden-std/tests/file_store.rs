// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

use std::fs;

use warden_core::auth::{AccessPolicy, Role};
use warden_core::error::{AuditError, EngineError};
use warden_core::types::{AuditFilter, Decision, DecisionType, VerdictReason};
use warden_core::{default_rules, GovernanceEngine};
use warden_std::{verify_file, FileAuditStore};

fn engine_at(path: &std::path::Path) -> Result<GovernanceEngine, EngineError> {
    GovernanceEngine::builder()
        .rules(default_rules())
        .access(AccessPolicy::default().with_grant("admin-1", Role::Administrator))
        .store(FileAuditStore::open(path).map_err(AuditError::from)?)
        .build()
}

#[test]
fn engine_restart_recovers_durable_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    let first = Decision::new("agent-001", DecisionType::TaskExecution, "process_user_data")
        .with_context("personal_data", true)
        .with_context("consent", false);
    {
        let engine = engine_at(&path).unwrap();
        let result = engine.validate(&first).unwrap();
        assert_eq!(result.reason, VerdictReason::ConstraintViolation);
        engine.trigger_halt("maintenance", "admin-1").unwrap();
    }

    let engine = engine_at(&path).unwrap();
    assert!(!engine.is_halted());
    let recovered = engine.audit_record(first.id).unwrap();
    assert_eq!(recovered.result.reason, VerdictReason::ConstraintViolation);

    engine
        .validate(&Decision::new("agent-002", DecisionType::TaskExecution, "read_logs"))
        .unwrap();
    assert_eq!(engine.query_audit(&AuditFilter::default()).len(), 3);

    let report = verify_file(&path).unwrap();
    assert_eq!(report.records, 3);
    assert!(report.is_gapless());
    assert_eq!(report.tip, engine.audit_integrity().unwrap().tip);
}

#[test]
fn non_finite_context_never_poisons_the_durable_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let decision = Decision::new("agent-001", DecisionType::TaskExecution, "score_batch")
        .with_context("confidence", f64::NAN)
        .with_context("explanation", "nightly scoring");
    {
        let engine = engine_at(&path).unwrap();
        assert!(matches!(
            engine.validate(&decision),
            Err(EngineError::InvalidDecision { decision_id, .. }) if decision_id == decision.id
        ));
    }

    let engine = engine_at(&path).unwrap();
    let recovered = engine.audit_record(decision.id).unwrap();
    assert_eq!(recovered.result.reason, VerdictReason::InvalidDecision);
    assert!(!recovered.decision.context.contains_key("confidence"));
    assert!(verify_file(&path).unwrap().is_gapless());
}

#[test]
fn edited_log_fails_verification_and_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    {
        let engine = engine_at(&path).unwrap();
        for action in ["read_logs", "write_report"] {
            engine
                .validate(&Decision::new("agent-001", DecisionType::TaskExecution, action))
                .unwrap();
        }
    }

    let raw = fs::read_to_string(&path).unwrap();
    fs::write(&path, raw.replacen("write_report", "delete_report", 1)).unwrap();

    assert!(matches!(
        verify_file(&path),
        Err(AuditError::IntegrityViolation { sequence: 2, .. })
    ));
    assert!(matches!(
        engine_at(&path),
        Err(EngineError::Audit(AuditError::IntegrityViolation { sequence: 2, .. }))
    ));
}

#[test]
fn verifying_a_missing_file_reports_an_empty_chain() {
    let dir = tempfile::tempdir().unwrap();
    let report = verify_file(dir.path().join("never-written.jsonl")).unwrap();
    assert_eq!(report.records, 0);
    assert!(report.is_gapless());
}
