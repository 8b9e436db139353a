// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # Basic Governance Engine Example
//!
//! Loads a small governance file, validates a handful of decisions, exercises
//! an emergency halt, and prints the resulting audit trail.  Run with:
//!
//! ```bash
//! RUST_LOG=warden_core=debug cargo run --example basic
//! ```

use tracing_subscriber::EnvFilter;
use warden_core::{
    config_loader::parse_config,
    storage::InMemoryAuditStore,
    types::{AuditFilter, Decision, DecisionType},
    GovernanceEngine,
};

const GOVERNANCE: &str = r#"
[engine]
risk_threshold = 0.7

[[principals]]
id    = "admin-1"
roles = ["administrator"]

[[rules]]
id          = "privacy.consent_required"
category    = "privacy"
severity    = "critical"
description = "Personal data may only be processed with consent"
when        = [{ field = "personal_data", equals = true }]
check       = { kind = "predicate", field = "consent", expected = true }

[[rules]]
id       = "harm.prohibited_action"
category = "harm"
severity = "high"
check    = { kind = "deny_list", field = "action", values = ["delete_all_data", "disable_safety_controls"] }

[[rules]]
id       = "safety.cpu_ceiling"
category = "safety"
severity = "high"
check    = { kind = "threshold", field = "resources.cpu_percent", op = "le", limit = 90.0 }

[[budgets]]
key      = "team-analytics"
ceilings = { cpu_percent = 100.0 }
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Warden governance engine: basic example\n");

    // -----------------------------------------------------------------------
    // 1. Construct the engine
    // -----------------------------------------------------------------------
    let file = parse_config(GOVERNANCE)?;
    let engine = GovernanceEngine::from_file_config(file, InMemoryAuditStore::new())?;
    println!(
        "Loaded {} rules (registry version {})\n",
        engine.registry().current_snapshot().len(),
        engine.registry_version()
    );

    // -----------------------------------------------------------------------
    // 2. Validate decisions
    // -----------------------------------------------------------------------
    let decisions = [
        Decision::new("agent-001", DecisionType::TaskExecution, "process_user_data")
            .with_team("team-analytics")
            .with_context("personal_data", false)
            .with_context("consent", true)
            .with_resource("cpu_percent", 30.0),
        Decision::new("agent-001", DecisionType::TaskExecution, "process_user_data")
            .with_team("team-analytics")
            .with_context("personal_data", true)
            .with_context("consent", false),
        Decision::new("agent-002", DecisionType::ResourceRequest, "train_model")
            .with_team("team-analytics")
            .with_resource("cpu_percent", 150.0),
    ];

    for decision in &decisions {
        let result = engine.validate(decision)?;
        println!("{} / {}", decision.agent_id, decision.action);
        println!("  approved:  {}", result.approved);
        println!("  reason:    {}", result.reason);
        println!("  risk:      {:.3}", result.risk_score);
        println!("  reasoning: {}\n", result.reasoning);
    }

    if let Some(usage) = engine.resource_usage("team-analytics") {
        println!("team-analytics cpu committed: {}\n", usage.committed("cpu_percent"));
    }

    // -----------------------------------------------------------------------
    // 3. Emergency halt
    // -----------------------------------------------------------------------
    engine.trigger_halt("manual-stop", "admin-1")?;
    let retry = Decision::new("agent-001", DecisionType::TaskExecution, "read_logs");
    let blocked = engine.validate(&retry)?;
    println!("While halted: approved={} reason={}", blocked.approved, blocked.reason);

    engine.lift_halt("admin-1")?;
    println!("After lift:   status={}\n", engine.emergency_state().status);

    // -----------------------------------------------------------------------
    // 4. Audit trail
    // -----------------------------------------------------------------------
    println!("Audit trail:");
    for record in engine.query_audit(&AuditFilter::default()) {
        println!(
            "  #{:<3} {:<16} {:<20} {:<24} {}",
            record.sequence,
            record.decision.agent_id,
            record.decision.action,
            record.result.reason,
            &record.hash[..12]
        );
    }

    let report = engine.audit_integrity()?;
    println!("\nChain verified: {} records, tip {}", report.records, &report.tip[..12]);
    Ok(())
}
