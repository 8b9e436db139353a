// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Constraint rules and the evaluator that interprets them.
//!
//! Rules are data, not code.  Each one carries a [`RuleCheck`] drawn from a
//! closed set of kinds (boolean predicate, numeric threshold, allow list,
//! deny list, presence) that name the decision field they inspect.  This keeps rule
//! sets serialisable and safe to hot-reload.
//!
//! ## Field resolution
//!
//! A field name is resolved against a [`Decision`] as follows:
//!
//! | Field              | Value                                  |
//! |--------------------|----------------------------------------|
//! | `action`           | the action label (text)                |
//! | `agent_id`         | the agent identifier (text)            |
//! | `team_id`          | the team identifier, if any (text)     |
//! | `resources.<dim>`  | the requested amount of `<dim>`        |
//! | anything else      | the context entry of that name         |
//!
//! ## Missing fields
//!
//! | Check       | Field absent                  |
//! |-------------|-------------------------------|
//! | `predicate` | fails                         |
//! | `present`   | fails                         |
//! | `threshold` | rule is not applicable        |
//! | `allow_list`| fails                         |
//! | `deny_list` | passes                        |

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::types::{
    Category, ContextValue, Decision, DecisionType, OutcomeKind, RuleOutcome, Severity,
};

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn holds(self, value: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => value < limit,
            Comparison::Le => value <= limit,
            Comparison::Gt => value > limit,
            Comparison::Ge => value >= limit,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        })
    }
}

/// The evaluation contract of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// `field` must be a boolean equal to `expected`.
    Predicate { field: String, expected: bool },
    /// `field` must be set, whatever its value.
    Present { field: String },
    /// `field` must be a number satisfying `field <op> limit`.
    Threshold {
        field: String,
        op: Comparison,
        limit: f64,
    },
    /// Every text value of `field` must be one of `values`.
    AllowList { field: String, values: Vec<String> },
    /// No text value of `field` may be one of `values`.
    DenyList { field: String, values: Vec<String> },
}

impl RuleCheck {
    pub fn field(&self) -> &str {
        match self {
            RuleCheck::Predicate { field, .. }
            | RuleCheck::Present { field }
            | RuleCheck::Threshold { field, .. }
            | RuleCheck::AllowList { field, .. }
            | RuleCheck::DenyList { field, .. } => field,
        }
    }

    fn validate(&self, rule_id: &str) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidRule {
            rule_id: rule_id.into(),
            reason: reason.into(),
        };
        if self.field().trim().is_empty() {
            return Err(invalid("check field is empty"));
        }
        match self {
            RuleCheck::Threshold { limit, .. } if !limit.is_finite() => {
                Err(invalid("threshold limit must be finite"))
            }
            RuleCheck::AllowList { values, .. } | RuleCheck::DenyList { values, .. }
                if values.is_empty() =>
            {
                Err(invalid("list checks need at least one value"))
            }
            _ => Ok(()),
        }
    }

    /// Evaluate against `decision`.
    ///
    /// Returns `None` when the check does not apply, otherwise the pass flag
    /// and a short explanation of what was found.
    fn evaluate(&self, decision: &Decision) -> Option<(bool, String)> {
        let value = resolve_field(decision, self.field());
        match self {
            RuleCheck::Predicate { field, expected } => Some(match value.as_deref() {
                Some(ContextValue::Bool(actual)) => (
                    actual == expected,
                    format!("'{field}' is {actual}, expected {expected}"),
                ),
                Some(other) => (false, format!("'{field}' is {other}, expected {expected}")),
                None => (false, format!("'{field}' is missing, expected {expected}")),
            }),
            RuleCheck::Present { field } => Some(match value {
                Some(_) => (true, format!("'{field}' is set")),
                None => (false, format!("'{field}' is missing")),
            }),
            RuleCheck::Threshold { field, op, limit } => {
                let value = value?;
                Some(match value.as_f64() {
                    Some(actual) => (
                        op.holds(actual, *limit),
                        format!("'{field}' is {actual}, limit {op} {limit}"),
                    ),
                    None => (false, format!("'{field}' is {value}, not a number")),
                })
            }
            RuleCheck::AllowList { field, values } => Some(match value.as_deref() {
                None => (false, format!("'{field}' is missing")),
                Some(value) => {
                    let texts = value.texts();
                    let outside: Vec<&str> = texts
                        .iter()
                        .copied()
                        .filter(|t| !values.iter().any(|v| v.as_str() == *t))
                        .collect();
                    if texts.is_empty() {
                        (false, format!("'{field}' is {value}, not text"))
                    } else if outside.is_empty() {
                        (true, format!("'{field}' is within the allow list"))
                    } else {
                        (false, format!("'{field}' has {outside:?} outside the allow list"))
                    }
                }
            }),
            RuleCheck::DenyList { field, values } => Some(match value.as_deref() {
                None => (true, format!("'{field}' is not set")),
                Some(value) => {
                    let denied: Vec<&str> = value
                        .texts()
                        .into_iter()
                        .filter(|t| values.iter().any(|v| v.as_str() == *t))
                        .collect();
                    if denied.is_empty() {
                        (true, format!("'{field}' is not on the deny list"))
                    } else {
                        (false, format!("'{field}' has denied value(s) {denied:?}"))
                    }
                }
            }),
        }
    }
}

/// A guard that must hold for a rule to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub field: String,
    pub equals: ContextValue,
}

impl FieldMatch {
    pub fn new(field: impl Into<String>, equals: impl Into<ContextValue>) -> Self {
        Self { field: field.into(), equals: equals.into() }
    }

    fn holds(&self, decision: &Decision) -> bool {
        resolve_field(decision, &self.field).as_deref() == Some(&self.equals)
    }
}

fn resolve_field<'a>(decision: &'a Decision, field: &str) -> Option<Cow<'a, ContextValue>> {
    match field {
        "action" => Some(Cow::Owned(ContextValue::Text(decision.action.clone()))),
        "agent_id" => Some(Cow::Owned(ContextValue::Text(decision.agent_id.clone()))),
        "team_id" => decision
            .team_id
            .as_ref()
            .map(|team| Cow::Owned(ContextValue::Text(team.clone()))),
        _ => match field.strip_prefix("resources.") {
            Some(dimension) => decision
                .resources_required
                .get(dimension)
                .map(|amount| Cow::Owned(ContextValue::Number(*amount))),
            None => decision.context.get(field).map(Cow::Borrowed),
        },
    }
}

// ---------------------------------------------------------------------------
// Definitions and compiled rules
// ---------------------------------------------------------------------------

/// A rule as authored in configuration.
///
/// `category`, `severity` and `check` are optional here so that a rule set
/// missing them can be reported precisely; [`ConstraintRule::compile`]
/// rejects such definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub description: String,
    /// Overrides the severity's default weight.
    #[serde(default)]
    pub weight: Option<f64>,
    /// Narrows applicability beyond the category relevance table.
    #[serde(default)]
    pub decision_types: Vec<DecisionType>,
    /// All guards must hold for the rule to apply.
    #[serde(default)]
    pub when: Vec<FieldMatch>,
    #[serde(default)]
    pub check: Option<RuleCheck>,
}

impl RuleDefinition {
    pub fn new(
        id: impl Into<String>,
        category: Category,
        severity: Severity,
        check: RuleCheck,
    ) -> Self {
        Self {
            id: id.into(),
            category: Some(category),
            severity: Some(severity),
            description: String::new(),
            weight: None,
            decision_types: Vec::new(),
            when: Vec::new(),
            check: Some(check),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn only_for(mut self, decision_type: DecisionType) -> Self {
        self.decision_types.push(decision_type);
        self
    }

    pub fn when(mut self, guard: FieldMatch) -> Self {
        self.when.push(guard);
        self
    }
}

/// A validated, immutable rule as published in a registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRule {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    pub weight: f64,
    pub decision_types: Vec<DecisionType>,
    pub when: Vec<FieldMatch>,
    pub check: RuleCheck,
}

impl ConstraintRule {
    /// Validate a definition and turn it into a publishable rule.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::MissingField`] when `category`, `severity` or
    /// `check` is absent, [`ConfigurationError::InvalidRule`] for an empty id,
    /// a non-positive weight, or a malformed check.
    pub fn compile(definition: RuleDefinition) -> Result<Self, ConfigurationError> {
        let RuleDefinition {
            id,
            category,
            severity,
            description,
            weight,
            decision_types,
            when,
            check,
        } = definition;

        if id.trim().is_empty() {
            return Err(ConfigurationError::InvalidRule {
                rule_id: id,
                reason: "rule id is empty".into(),
            });
        }
        let missing = |field| ConfigurationError::MissingField { rule_id: id.clone(), field };
        let category = category.ok_or_else(|| missing("category"))?;
        let severity = severity.ok_or_else(|| missing("severity"))?;
        let check = check.ok_or_else(|| missing("check"))?;
        check.validate(&id)?;

        let weight = weight.unwrap_or_else(|| severity.default_weight());
        if !weight.is_finite() || weight <= 0.0 {
            return Err(ConfigurationError::InvalidRule {
                rule_id: id,
                reason: format!("weight must be a positive finite number, got {weight}"),
            });
        }
        if let Some(guard) = when.iter().find(|guard| guard.field.trim().is_empty()) {
            return Err(ConfigurationError::InvalidRule {
                rule_id: id,
                reason: format!("guard on empty field (equals {})", guard.equals),
            });
        }
        if let Some(guard) = when.iter().find(|guard| !guard.equals.is_finite()) {
            return Err(ConfigurationError::InvalidRule {
                reason: format!("guard on '{}' compares against non-finite {}", guard.field, guard.equals),
                rule_id: id,
            });
        }

        Ok(Self {
            id,
            category,
            severity,
            description,
            weight,
            decision_types,
            when,
            check,
        })
    }

    /// Whether the rule is evaluated for decisions of `decision_type`.
    pub fn applies_to(&self, decision_type: DecisionType) -> bool {
        decision_type.relevant_categories().contains(&self.category)
            && (self.decision_types.is_empty() || self.decision_types.contains(&decision_type))
    }

    /// Evaluate the rule against `decision`.
    ///
    /// A rule whose guards do not hold, or whose check reports itself not
    /// applicable, yields an outcome with `applicable == false` and zero
    /// weight.
    ///
    /// ```rust
    /// use warden_core::rules::{ConstraintRule, FieldMatch, RuleCheck, RuleDefinition};
    /// use warden_core::types::{Category, Decision, DecisionType, Severity};
    ///
    /// let rule = ConstraintRule::compile(
    ///     RuleDefinition::new(
    ///         "privacy.consent",
    ///         Category::Privacy,
    ///         Severity::Critical,
    ///         RuleCheck::Predicate { field: "consent".into(), expected: true },
    ///     )
    ///     .when(FieldMatch::new("personal_data", true)),
    /// )
    /// .unwrap();
    ///
    /// let decision = Decision::new("agent-7", DecisionType::TaskExecution, "export")
    ///     .with_context("personal_data", true)
    ///     .with_context("consent", false);
    ///
    /// let outcome = rule.evaluate(&decision);
    /// assert!(outcome.applicable && !outcome.passed);
    /// assert_eq!(outcome.contribution, 1.0);
    /// ```
    pub fn evaluate(&self, decision: &Decision) -> RuleOutcome {
        if let Some(guard) = self.when.iter().find(|guard| !guard.holds(decision)) {
            return self.outcome(
                false,
                true,
                format!("not applicable: '{}' is not {}", guard.field, guard.equals),
            );
        }
        match self.check.evaluate(decision) {
            None => self.outcome(
                false,
                true,
                format!("not applicable: '{}' is not set", self.check.field()),
            ),
            Some((passed, detail)) => {
                let explanation = if self.description.is_empty() {
                    detail
                } else {
                    format!("{} ({})", self.description, detail)
                };
                self.outcome(true, passed, explanation)
            }
        }
    }

    fn outcome(&self, applicable: bool, passed: bool, explanation: String) -> RuleOutcome {
        let weight = if applicable { self.weight } else { 0.0 };
        RuleOutcome {
            rule_id: self.id.clone(),
            kind: OutcomeKind::Rule,
            category: self.category,
            severity: self.severity,
            applicable,
            passed,
            weight,
            contribution: if passed { 0.0 } else { weight },
            explanation,
        }
    }
}

// ---------------------------------------------------------------------------
// Default rule set
// ---------------------------------------------------------------------------

/// Actions refused by the default harm rule.
pub const DEFAULT_HARMFUL_ACTIONS: &[&str] = &[
    "delete_all_data",
    "disable_safety_controls",
    "exfiltrate_credentials",
    "impersonate_user",
];

/// The rule set an engine built with `with_defaults()` starts from.
pub fn default_rules() -> Vec<RuleDefinition> {
    let list = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
    vec![
        RuleDefinition::new(
            "privacy.consent_required",
            Category::Privacy,
            Severity::Critical,
            RuleCheck::Predicate { field: "consent".into(), expected: true },
        )
        .describe("Processing personal data requires recorded consent")
        .when(FieldMatch::new("personal_data", true)),
        RuleDefinition::new(
            "harm.prohibited_action",
            Category::Harm,
            Severity::High,
            RuleCheck::DenyList {
                field: "action".into(),
                values: list(DEFAULT_HARMFUL_ACTIONS),
            },
        )
        .describe("Action is on the prohibited list"),
        RuleDefinition::new(
            "transparency.explanation_required",
            Category::Transparency,
            Severity::Medium,
            RuleCheck::Present { field: "explanation".into() },
        )
        .describe("Outbound communication must carry an explanation")
        .only_for(DecisionType::Communication),
        RuleDefinition::new(
            "safety.cpu_ceiling",
            Category::Safety,
            Severity::High,
            RuleCheck::Threshold {
                field: "resources.cpu_percent".into(),
                op: Comparison::Le,
                limit: 90.0,
            },
        )
        .describe("A single action may not claim more than 90% CPU"),
        RuleDefinition::new(
            "fairness.protected_targeting",
            Category::Fairness,
            Severity::Low,
            RuleCheck::DenyList {
                field: "target_group".into(),
                values: list(&["age", "disability", "ethnicity", "gender", "religion"]),
            },
        )
        .describe("Actions may not target protected groups"),
        RuleDefinition::new(
            "accountability.requester_recorded",
            Category::Accountability,
            Severity::Medium,
            RuleCheck::Present { field: "requested_by".into() },
        )
        .describe("Data access must record who requested it")
        .only_for(DecisionType::DataAccess),
    ]
}
