// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Shared data types used across all governance sub-systems.
//!
//! All types implement [`Clone`], [`Debug`], [`serde::Serialize`], and
//! [`serde::Deserialize`] so they can be persisted in the audit log and
//! transmitted across the WASM boundary without additional conversion steps.
//!
//! Maps that take part in audit hashing are [`BTreeMap`]s so that their
//! serialised form is canonical.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Rule taxonomy
// ---------------------------------------------------------------------------

/// The seven concerns a constraint rule can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Harm,
    Privacy,
    Fairness,
    Transparency,
    Resource,
    Accountability,
    Safety,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 7] = [
        Category::Harm,
        Category::Privacy,
        Category::Fairness,
        Category::Transparency,
        Category::Resource,
        Category::Accountability,
        Category::Safety,
    ];

    /// Stable lowercase name used in logs and reasoning text.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Harm           => "harm",
            Category::Privacy        => "privacy",
            Category::Fairness       => "fairness",
            Category::Transparency   => "transparency",
            Category::Resource       => "resource",
            Category::Accountability => "accountability",
            Category::Safety         => "safety",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a failure of a rule is.
///
/// Ordered from least to most severe so that `Severity::Critical` is the
/// maximum.  A failed critical rule rejects a decision regardless of its
/// aggregate risk score.
///
/// ```rust
/// use warden_core::types::Severity;
///
/// assert!(Severity::Critical > Severity::High);
/// assert_eq!(Severity::Medium.default_weight(), 0.5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution weight used when a rule does not set one explicitly.
    pub fn default_weight(self) -> f64 {
        match self {
            Severity::Low      => 0.25,
            Severity::Medium   => 0.5,
            Severity::High     => 0.75,
            Severity::Critical => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low      => "low",
            Severity::Medium   => "medium",
            Severity::High     => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The kind of action an agent proposes.
///
/// Each type fixes which rule categories apply to it and which context keys
/// must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    TaskExecution,
    ResourceRequest,
    Communication,
    DataAccess,
    /// Reserved for the halt-lift action and engine-generated records.
    Administrative,
}

impl DecisionType {
    /// Rule categories evaluated for this decision type.
    pub fn relevant_categories(self) -> &'static [Category] {
        use Category::*;
        match self {
            DecisionType::TaskExecution => &Category::ALL,
            DecisionType::ResourceRequest => &[Resource, Accountability, Safety],
            DecisionType::Communication => {
                &[Harm, Privacy, Fairness, Transparency, Accountability]
            }
            DecisionType::DataAccess => {
                &[Privacy, Fairness, Transparency, Accountability, Safety]
            }
            DecisionType::Administrative => &[Accountability, Safety],
        }
    }

    /// Context keys that must be present for a decision of this type.
    pub fn required_context_keys(self) -> &'static [&'static str] {
        match self {
            DecisionType::Communication => &["recipient"],
            DecisionType::DataAccess => &["personal_data"],
            _ => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionType::TaskExecution   => "task_execution",
            DecisionType::ResourceRequest => "resource_request",
            DecisionType::Communication   => "communication",
            DecisionType::DataAccess      => "data_access",
            DecisionType::Administrative  => "administrative",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed fact about a decision, inspected by constraint rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl ContextValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ContextValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ContextValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// `false` only for a NaN or infinite number, which JSON cannot carry.
    pub fn is_finite(&self) -> bool {
        match self {
            ContextValue::Number(value) => value.is_finite(),
            _ => true,
        }
    }

    /// The textual members of this value: one for `Text`, all for `List`.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            ContextValue::Text(value) => vec![value.as_str()],
            ContextValue::List(values) => values.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Bool(value)   => write!(f, "{value}"),
            ContextValue::Number(value) => write!(f, "{value}"),
            ContextValue::Text(value)   => write!(f, "\"{value}\""),
            ContextValue::List(values)  => write!(f, "{values:?}"),
        }
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Number(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Number(value as f64)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.into())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(values: Vec<String>) -> Self {
        ContextValue::List(values)
    }
}

/// Named facts attached to a decision.
pub type Context = BTreeMap<String, ContextValue>;

/// Resource dimension (e.g. `cpu_percent`, `memory_mb`) → amount.
pub type ResourceMap = BTreeMap<String, f64>;

/// Action label of the administrative decision that lifts an emergency halt.
pub const LIFT_ACTION: &str = "emergency.lift";

/// A proposed agent action submitted to the engine before execution.
///
/// # Examples
///
/// ```rust
/// use warden_core::types::{Decision, DecisionType};
///
/// let decision = Decision::new("agent-001", DecisionType::TaskExecution, "process_user_data")
///     .with_context("personal_data", false)
///     .with_context("consent", true)
///     .with_resource("cpu_percent", 30.0);
///
/// assert_eq!(decision.budget_key(), "agent-001");
/// assert!(decision.check_well_formed().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Identifier shared 1:1 with the resulting `ValidationResult`.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Agent proposing the action.
    pub agent_id: String,
    /// Team whose budget the action draws from, if not the agent's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub decision_type: DecisionType,
    /// Short label naming the action (e.g. "send_email").
    pub action: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub resources_required: ResourceMap,
}

impl Decision {
    /// Create a decision with a fresh identifier and empty context.
    pub fn new(
        agent_id: impl Into<String>,
        decision_type: DecisionType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            team_id: None,
            decision_type,
            action: action.into(),
            context: Context::new(),
            resources_required: ResourceMap::new(),
        }
    }

    /// The administrative decision that asks the engine to lift a halt.
    pub fn lift_request(principal: impl Into<String>) -> Self {
        Self::new(principal, DecisionType::Administrative, LIFT_ACTION)
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, dimension: impl Into<String>, amount: f64) -> Self {
        self.resources_required.insert(dimension.into(), amount);
        self
    }

    /// Budget the decision's resources are reserved against: the team when
    /// one is named, the agent otherwise.
    pub fn budget_key(&self) -> &str {
        self.team_id.as_deref().unwrap_or(&self.agent_id)
    }

    pub fn is_lift_request(&self) -> bool {
        self.decision_type == DecisionType::Administrative && self.action == LIFT_ACTION
    }

    /// Check the structural requirements for this decision's type.
    ///
    /// Returns a description of the first problem found.
    pub fn check_well_formed(&self) -> Result<(), String> {
        if self.agent_id.trim().is_empty() {
            return Err("agent_id is empty".into());
        }
        if self.action.trim().is_empty() {
            return Err("action is empty".into());
        }
        for key in self.decision_type.required_context_keys() {
            if !self.context.contains_key(*key) {
                return Err(format!(
                    "context key '{}' is required for {} decisions",
                    key, self.decision_type
                ));
            }
        }
        if self.decision_type == DecisionType::ResourceRequest && self.resources_required.is_empty() {
            return Err("resource_request decisions must name at least one resource".into());
        }
        for (dimension, amount) in &self.resources_required {
            if !amount.is_finite() || *amount < 0.0 {
                return Err(format!("resource '{dimension}' has invalid amount {amount}"));
            }
        }
        if let Some((key, value)) = self.context.iter().find(|(_, value)| !value.is_finite()) {
            return Err(format!("context key '{key}' has non-finite value {value}"));
        }
        Ok(())
    }

    /// The form of this decision that can be written to the audit log.
    ///
    /// Non-finite numbers serialise as JSON `null` and could not be read
    /// back, so context entries and resource amounts holding one are
    /// dropped.  Every other field, the id included, is kept.
    pub fn recordable(&self) -> Cow<'_, Decision> {
        let finite_resources = self.resources_required.values().all(|amount| amount.is_finite());
        let finite_context = self.context.values().all(ContextValue::is_finite);
        if finite_resources && finite_context {
            return Cow::Borrowed(self);
        }
        let mut cleaned = self.clone();
        cleaned.resources_required.retain(|_, amount| amount.is_finite());
        cleaned.context.retain(|_, value| value.is_finite());
        Cow::Owned(cleaned)
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Where a rule outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// A constraint rule from the registry snapshot.
    Rule,
    /// The resource arbiter's availability check.
    Resource,
}

/// The result of evaluating one rule against one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub kind: OutcomeKind,
    pub category: Category,
    pub severity: Severity,
    /// `false` when the rule's preconditions did not hold; such outcomes
    /// carry zero weight.
    pub applicable: bool,
    pub passed: bool,
    /// Maximum contribution this rule could make to the risk score.
    pub weight: f64,
    /// Actual contribution: `weight` when failed, `0.0` otherwise.
    pub contribution: f64,
    pub explanation: String,
}

impl RuleOutcome {
    /// A failed critical outcome produced by insufficient budget headroom.
    pub fn resource_exhausted(key: &str, shortfalls: &[Shortfall]) -> Self {
        let detail = shortfalls
            .iter()
            .map(|s| format!("{} needs {} but {} is available", s.dimension, s.requested, s.available))
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            rule_id: RESOURCE_RULE_ID.into(),
            kind: OutcomeKind::Resource,
            category: Category::Resource,
            severity: Severity::Critical,
            applicable: true,
            passed: false,
            weight: Severity::Critical.default_weight(),
            contribution: Severity::Critical.default_weight(),
            explanation: format!("Budget '{key}' cannot cover the request: {detail}."),
        }
    }

    pub fn failed(&self) -> bool {
        self.applicable && !self.passed
    }
}

/// Rule id carried by resource-availability outcomes.
pub const RESOURCE_RULE_ID: &str = "resource.budget";

/// Why a decision was approved or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Approved,
    /// A critical-severity rule failed.
    ConstraintViolation,
    /// The aggregate risk score reached the configured threshold.
    RiskThresholdExceeded,
    ResourceExhausted,
    SystemHalted,
    InvalidDecision,
    /// An administrative request was refused for lack of authorisation.
    Unauthorized,
    /// An administrative request asked for a transition that is not possible.
    InvalidTransition,
    /// An engine-recorded administrative event (halt, lift, reload, budget).
    Administrative,
}

impl VerdictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictReason::Approved              => "approved",
            VerdictReason::ConstraintViolation   => "constraint_violation",
            VerdictReason::RiskThresholdExceeded => "risk_threshold_exceeded",
            VerdictReason::ResourceExhausted     => "resource_exhausted",
            VerdictReason::SystemHalted          => "system_halted",
            VerdictReason::InvalidDecision       => "invalid_decision",
            VerdictReason::Unauthorized          => "unauthorized",
            VerdictReason::InvalidTransition     => "invalid_transition",
            VerdictReason::Administrative        => "administrative",
        }
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The verdict produced for exactly one [`Decision`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub decision_id: Uuid,
    pub approved: bool,
    pub reason: VerdictReason,
    /// Aggregate risk in `[0, 1]`.
    pub risk_score: f64,
    /// Per-rule outcomes in registry order, followed by resource outcomes.
    pub outcomes: Vec<RuleOutcome>,
    /// Human-readable explanation citing every failed rule by id.
    pub reasoning: String,
    pub timestamp_ms: u64,
    /// Constraint registry version the decision was evaluated against.
    pub registry_version: u64,
}

impl ValidationResult {
    /// Iterate over outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.failed())
    }

    /// Whether `rule_id` is among the failed outcomes, and so cited in the
    /// reasoning.
    pub fn cites(&self, rule_id: &str) -> bool {
        self.failures().any(|outcome| outcome.rule_id == rule_id)
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Hash used as `prev_hash` by the first record of a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// An immutable, sequentially numbered audit log entry pairing a decision
/// with its verdict.
///
/// Records are chained via `prev_hash` to form a tamper-evident log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Strictly increasing, gapless under normal operation.  Starts at 1.
    pub sequence: u64,
    pub decision: Decision,
    pub result: ValidationResult,
    /// Hash of the preceding record, or [`GENESIS_HASH`].
    pub prev_hash: String,
    /// SHA-256 hex digest over every other field of this record.
    pub hash: String,
    pub recorded_at_ms: u64,
}

impl AuditRecord {
    pub fn decision_id(&self) -> Uuid {
        self.decision.id
    }
}

/// Filter used to narrow the results of an audit query.
///
/// Every field is optional; an empty filter matches all records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub decision_type: Option<DecisionType>,
    #[serde(default)]
    pub action: Option<String>,
    /// Inclusive lower bound on `recorded_at_ms`.
    #[serde(default)]
    pub since_ms: Option<u64>,
    /// Inclusive upper bound on `recorded_at_ms`.
    #[serde(default)]
    pub until_ms: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(ref agent_id) = self.agent_id {
            if &record.decision.agent_id != agent_id {
                return false;
            }
        }
        if let Some(decision_type) = self.decision_type {
            if record.decision.decision_type != decision_type {
                return false;
            }
        }
        if let Some(ref action) = self.action {
            if &record.decision.action != action {
                return false;
            }
        }
        if let Some(since_ms) = self.since_ms {
            if record.recorded_at_ms < since_ms {
                return false;
            }
        }
        if let Some(until_ms) = self.until_ms {
            if record.recorded_at_ms > until_ms {
                return false;
            }
        }
        true
    }
}

/// A run of missing sequence numbers: everything strictly between `after`
/// and `next` is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGap {
    pub after: u64,
    pub next: u64,
}

/// Summary of a verified audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub records: usize,
    pub gaps: Vec<SequenceGap>,
    /// Hash of the last record, or [`GENESIS_HASH`] for an empty chain.
    pub tip: String,
}

impl ChainReport {
    pub fn is_gapless(&self) -> bool {
        self.gaps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Emergency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyStatus {
    Normal,
    Halted,
}

impl fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmergencyStatus::Normal => f.write_str("normal"),
            EmergencyStatus::Halted => f.write_str("halted"),
        }
    }
}

/// The process-wide emergency state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyState {
    pub status: EmergencyStatus,
    /// Reason given for the most recent halt; cleared on lift.
    pub reason: Option<String>,
    /// Principal that made the most recent transition.
    pub principal: Option<String>,
    pub changed_at_ms: u64,
}

impl EmergencyState {
    pub fn normal(now_ms: u64) -> Self {
        Self {
            status: EmergencyStatus::Normal,
            reason: None,
            principal: None,
            changed_at_ms: now_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Ceilings and committed usage for one agent or team.
///
/// Invariant: for every dimension, `committed <= ceiling`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub key: String,
    pub ceilings: ResourceMap,
    pub committed: ResourceMap,
}

impl ResourceBudget {
    pub fn new(key: impl Into<String>, ceilings: ResourceMap) -> Self {
        Self {
            key: key.into(),
            ceilings,
            committed: ResourceMap::new(),
        }
    }

    pub fn committed(&self, dimension: &str) -> f64 {
        self.committed.get(dimension).copied().unwrap_or(0.0)
    }

    /// Headroom left in `dimension`, or `None` when the dimension has no ceiling.
    pub fn available(&self, dimension: &str) -> Option<f64> {
        self.ceilings
            .get(dimension)
            .map(|ceiling| (ceiling - self.committed(dimension)).max(0.0))
    }
}

/// One dimension of a request that does not fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortfall {
    pub dimension: String,
    pub requested: f64,
    pub available: f64,
}

/// Result of a non-committing availability check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCheck {
    pub key: String,
    pub granted: bool,
    pub shortfalls: Vec<Shortfall>,
}
