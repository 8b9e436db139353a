// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # warden-wasm
//!
//! WebAssembly bindings for the warden governance engine.
//!
//! This crate exposes the `warden-core` API to JavaScript and TypeScript
//! consumers running in browser or edge-worker environments via
//! `wasm-bindgen`.
//!
//! ## Architecture
//!
//! Each engine created here is a [`GovernanceEngine`] over an in-memory audit
//! store.  Engine instances are stored in a thread-local registry keyed by
//! integer handles because WASM is single-threaded and `wasm_bindgen` cannot
//! export opaque Rust structs across the JS boundary without serialisation
//! overhead.
//!
//! Every function takes and returns JSON strings.  Failures are reported as
//! `{"error":"..."}` rather than thrown.
//!
//! ## Exported Functions
//!
//! | Function                    | Description                                         |
//! |-----------------------------|-----------------------------------------------------|
//! | `create_engine`             | Create an engine with the default rule set          |
//! | `create_engine_with_config` | Create an engine from a JSON governance document    |
//! | `validate`                  | Validate a decision (JSON in, JSON verdict out)     |
//! | `validate_value`            | Validate a decision passed as a JS object           |
//! | `trigger_halt`              | Halt all approvals                                  |
//! | `lift_halt`                 | Lift a halt                                         |
//! | `emergency_state`           | Current emergency state                             |
//! | `reload_constraints`        | Publish a new rule set                              |
//! | `define_budget`             | Define or redefine a resource budget                |
//! | `reserve_resources`         | Reserve resources outside a validation              |
//! | `release_resources`         | Return reserved resources                           |
//! | `query_audit`               | Query the audit log with a JSON filter              |
//! | `audit_integrity`           | Re-verify the audit hash chain                      |
//! | `destroy_engine`            | Release an engine handle and free its memory        |
//!
//! ## JavaScript Usage
//!
//! ```js
//! import init, {
//!   create_engine_with_config,
//!   validate,
//!   trigger_halt,
//!   lift_halt,
//!   query_audit,
//! } from '@warden/governance-wasm';
//!
//! await init();
//!
//! const handle = create_engine_with_config(JSON.stringify({
//!   principals: [{ id: 'admin-1', roles: ['administrator'] }],
//!   budgets:    [{ key: 'team-a', ceilings: { cpu_percent: 100 } }],
//! }));
//!
//! const verdict = JSON.parse(validate(handle, JSON.stringify({
//!   agent_id:           'agent-001',
//!   team_id:            'team-a',
//!   decision_type:      'task_execution',
//!   action:             'process_user_data',
//!   context:            { personal_data: false },
//!   resources_required: { cpu_percent: 30 },
//! })));
//! console.log(verdict.approved, verdict.reasoning);
//!
//! trigger_halt(handle, 'manual-stop', 'admin-1');
//! lift_halt(handle, 'admin-1');
//!
//! const trail = JSON.parse(query_audit(handle, '{}'));
//! console.log('Audit entries:', trail.length);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use wasm_bindgen::prelude::*;
use warden_core::{
    clock::Clock,
    config::BudgetDefinition,
    config_loader::GovernanceFile,
    engine::GovernanceEngine,
    rules::{default_rules, RuleDefinition},
    storage::InMemoryAuditStore,
    types::{AuditFilter, Decision, ResourceMap},
};

// ---------------------------------------------------------------------------
// Host clock
// ---------------------------------------------------------------------------

/// Reads `Date.now()` in the browser and the system clock natively.
struct HostClock;

impl Clock for HostClock {
    #[cfg(target_arch = "wasm32")]
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn now_ms(&self) -> u64 {
        warden_core::clock::current_time_ms()
    }
}

// ---------------------------------------------------------------------------
// Engine registry
// ---------------------------------------------------------------------------

// WASM is single-threaded; RefCell<HashMap<...>> is safe here.
thread_local! {
    static ENGINES: RefCell<HashMap<u32, GovernanceEngine>> = RefCell::new(HashMap::new());
    static NEXT_HANDLE: RefCell<u32> = const { RefCell::new(0) };
}

/// Allocate a new engine handle. Handles wrap around at `u32::MAX - 1` to
/// reserve `u32::MAX` as the error sentinel.
fn next_handle() -> u32 {
    NEXT_HANDLE.with(|counter| {
        let handle = *counter.borrow();
        let next = if handle >= u32::MAX - 1 { 0 } else { handle + 1 };
        *counter.borrow_mut() = next;
        handle
    })
}

fn register(file: GovernanceFile) -> u32 {
    let built = file
        .into_builder()
        .store(InMemoryAuditStore::new())
        .clock(Arc::new(HostClock))
        .build();
    match built {
        Ok(engine) => {
            let handle = next_handle();
            ENGINES.with(|engines| {
                engines.borrow_mut().insert(handle, engine);
            });
            handle
        }
        Err(_) => u32::MAX,
    }
}

/// Run `callback` against the engine behind `handle`.
fn with_engine<F, R>(handle: u32, callback: F) -> Result<R, String>
where
    F: FnOnce(&GovernanceEngine) -> R,
{
    ENGINES.with(|engines| {
        let map = engines.borrow();
        match map.get(&handle) {
            Some(engine) => Ok(callback(engine)),
            None => Err(format!("unknown engine handle {handle}")),
        }
    })
}

/// Serialise `value`, or an `{"error": ...}` object.
fn respond<T: Serialize>(outcome: Result<T, String>) -> String {
    match outcome.and_then(|value| serde_json::to_string(&value).map_err(|e| e.to_string())) {
        Ok(body) => body,
        Err(message) => json!({ "error": message }).to_string(),
    }
}

fn parse<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> Result<T, String> {
    serde_json::from_str(raw).map_err(|e| format!("{what} parse error: {e}"))
}

// ---------------------------------------------------------------------------
// Engine lifecycle
// ---------------------------------------------------------------------------

/// Create an engine with default configuration and the built-in rule set,
/// and return its integer handle.
///
/// No principals are privileged, so administrative calls on this engine
/// are always refused; use [`create_engine_with_config`] to grant roles.
#[wasm_bindgen]
pub fn create_engine() -> u32 {
    register(GovernanceFile { rules: default_rules(), ..GovernanceFile::default() })
}

/// Create an engine from a JSON governance document:
///
/// ```json
/// {
///   "engine":     { "risk_threshold": 0.7 },
///   "principals": [{ "id": "admin-1", "roles": ["administrator"] }],
///   "rules":      [ ... ],
///   "budgets":    [{ "key": "team-a", "ceilings": { "cpu_percent": 100 } }]
/// }
/// ```
///
/// When `rules` is absent the built-in rule set is used.  Returns the engine
/// handle, or `u32::MAX` if the document is malformed or rejected.
#[wasm_bindgen]
pub fn create_engine_with_config(config_json: &str) -> u32 {
    let raw: serde_json::Value = match serde_json::from_str(config_json) {
        Ok(value) => value,
        Err(_) => return u32::MAX,
    };
    let has_rules = raw.get("rules").is_some();
    let mut file: GovernanceFile = match serde_json::from_value(raw) {
        Ok(file) => file,
        Err(_) => return u32::MAX,
    };
    if !has_rules {
        file.rules = default_rules();
    }
    register(file)
}

/// Release the engine associated with `handle`, freeing its memory.
#[wasm_bindgen]
pub fn destroy_engine(handle: u32) {
    ENGINES.with(|engines| {
        engines.borrow_mut().remove(&handle);
    });
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a JSON-encoded decision and return the JSON verdict.
///
/// A decision without an `id` is assigned a fresh one.
#[wasm_bindgen]
pub fn validate(handle: u32, decision_json: &str) -> String {
    respond(parse::<Decision>("decision", decision_json).and_then(|decision| {
        with_engine(handle, |engine| engine.validate(&decision).map_err(|e| e.to_string()))?
    }))
}

/// Validate a decision passed as a plain JS object and return the verdict
/// as a JS object.
///
/// # Errors
///
/// Rejects with a string message on a malformed decision, an unknown handle,
/// or an engine failure.
#[wasm_bindgen]
pub fn validate_value(handle: u32, decision: JsValue) -> Result<JsValue, JsValue> {
    let decision: Decision = serde_wasm_bindgen::from_value(decision)
        .map_err(|e| JsValue::from_str(&format!("decision parse error: {e}")))?;
    let result = with_engine(handle, |engine| engine.validate(&decision).map_err(|e| e.to_string()))
        .and_then(|outcome| outcome)
        .map_err(|message| JsValue::from_str(&message))?;
    serde_wasm_bindgen::to_value(&result).map_err(|e| JsValue::from_str(&e.to_string()))
}

// ---------------------------------------------------------------------------
// Emergency control
// ---------------------------------------------------------------------------

/// Halt the system.  Returns the new emergency state.
#[wasm_bindgen]
pub fn trigger_halt(handle: u32, reason: &str, principal: &str) -> String {
    respond(
        with_engine(handle, |engine| {
            engine.trigger_halt(reason, principal).map_err(|e| e.to_string())
        })
        .and_then(|outcome| outcome),
    )
}

/// Lift a halt.  Returns the new emergency state.
#[wasm_bindgen]
pub fn lift_halt(handle: u32, principal: &str) -> String {
    respond(
        with_engine(handle, |engine| engine.lift_halt(principal).map_err(|e| e.to_string()))
            .and_then(|outcome| outcome),
    )
}

#[wasm_bindgen]
pub fn emergency_state(handle: u32) -> String {
    respond(with_engine(handle, GovernanceEngine::emergency_state))
}

// ---------------------------------------------------------------------------
// Constraints and budgets
// ---------------------------------------------------------------------------

/// Publish a JSON array of rule definitions.  Returns `{"version": n}`.
#[wasm_bindgen]
pub fn reload_constraints(handle: u32, rules_json: &str, principal: &str) -> String {
    respond(parse::<Vec<RuleDefinition>>("rules", rules_json).and_then(|rules| {
        with_engine(handle, |engine| {
            engine
                .reload_constraints(rules, principal)
                .map(|version| json!({ "version": version }))
                .map_err(|e| e.to_string())
        })?
    }))
}

/// Define a budget from `{"key": ..., "ceilings": {...}}`.  Returns
/// `{"defined": key}`.
#[wasm_bindgen]
pub fn define_budget(handle: u32, budget_json: &str, principal: &str) -> String {
    respond(parse::<BudgetDefinition>("budget", budget_json).and_then(|budget| {
        let key = budget.key.clone();
        with_engine(handle, |engine| {
            engine
                .define_budget(budget, principal)
                .map(|()| json!({ "defined": key }))
                .map_err(|e| e.to_string())
        })?
    }))
}

/// Reserve `{"dimension": amount, ...}` against `key`, all or nothing.
/// Returns the budget's usage after the reservation.
#[wasm_bindgen]
pub fn reserve_resources(handle: u32, key: &str, resources_json: &str) -> String {
    respond(parse::<ResourceMap>("resources", resources_json).and_then(|resources| {
        with_engine(handle, |engine| {
            engine
                .reserve_resources(key, &resources)
                .map(|()| engine.resource_usage(key))
                .map_err(|e| e.to_string())
        })?
    }))
}

/// Return previously reserved resources.  Returns the budget's usage.
#[wasm_bindgen]
pub fn release_resources(handle: u32, key: &str, resources_json: &str) -> String {
    respond(parse::<ResourceMap>("resources", resources_json).and_then(|resources| {
        with_engine(handle, |engine| {
            engine
                .release_resources(key, &resources)
                .map(|()| engine.resource_usage(key))
                .map_err(|e| e.to_string())
        })?
    }))
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

/// Query the audit log and return a JSON array of records.
///
/// `filter_json` must match the `AuditFilter` shape; pass `"{}"` to
/// retrieve every record.
#[wasm_bindgen]
pub fn query_audit(handle: u32, filter_json: &str) -> String {
    respond(
        parse::<AuditFilter>("filter", filter_json)
            .and_then(|filter| with_engine(handle, |engine| engine.query_audit(&filter))),
    )
}

/// Re-verify the audit hash chain.  Returns `{records, gaps, tip}`.
#[wasm_bindgen]
pub fn audit_integrity(handle: u32) -> String {
    respond(
        with_engine(handle, |engine| engine.audit_integrity().map_err(|e| e.to_string()))
            .and_then(|outcome| outcome),
    )
}

// ---------------------------------------------------------------------------
// wasm-bindgen tests
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Native unit tests (run with `cargo test` outside of WASM)
// ---------------------------------------------------------------------------
