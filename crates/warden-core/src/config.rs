// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Engine-level configuration.
//!
//! [`EngineConfig`] is the single entry point for tuning the governance engine
//! at construction time.  All fields have sensible defaults so that
//! `EngineConfig::default()` is always a valid starting point.

use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::error::ConfigurationError;
use crate::types::{Category, ResourceMap};

/// Top-level configuration for [`GovernanceEngine`](crate::engine::GovernanceEngine).
///
/// # Examples
///
/// ```rust
/// use warden_core::config::EngineConfig;
///
/// let config = EngineConfig {
///     risk_threshold: 0.5,
///     ..EngineConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Aggregate risk at or above which a decision is rejected.  Must lie in
    /// `(0, 1]`.  Defaults to `0.7`.
    pub risk_threshold: f64,

    /// Per-category multipliers applied by the risk scorer.
    pub category_weights: CategoryWeights,

    /// When `true`, a budget key or dimension with no configured ceiling is
    /// unlimited.  When `false`, requesting it is treated as exhausted.
    /// Defaults to `true`.
    pub pass_on_missing_budget: bool,

    /// How many published rule snapshots the registry retains.
    pub registry_history: usize,

    pub auto_halt: AutoHaltPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.7,
            category_weights: CategoryWeights::default(),
            pass_on_missing_budget: true,
            registry_history: 8,
            auto_halt: AutoHaltPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Check every field against its permitted range.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::InvalidRange`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.risk_threshold > 0.0 && self.risk_threshold <= 1.0) {
            return Err(out_of_range(
                "risk_threshold",
                self.risk_threshold,
                "must be in the range (0, 1]",
            ));
        }
        for category in Category::ALL {
            let weight = self.category_weights.get(category);
            if !weight.is_finite() || weight < 0.0 {
                return Err(out_of_range(
                    &format!("category_weights.{category}"),
                    weight,
                    "must be a finite number >= 0",
                ));
            }
        }
        if self.registry_history == 0 {
            return Err(out_of_range("registry_history", 0, "must be at least 1"));
        }
        self.auto_halt.validate()
    }
}

/// Multiplier per rule category.  Equal weighting by default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub harm: f64,
    pub privacy: f64,
    pub fairness: f64,
    pub transparency: f64,
    pub resource: f64,
    pub accountability: f64,
    pub safety: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            harm: 1.0,
            privacy: 1.0,
            fairness: 1.0,
            transparency: 1.0,
            resource: 1.0,
            accountability: 1.0,
            safety: 1.0,
        }
    }
}

impl CategoryWeights {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Harm           => self.harm,
            Category::Privacy        => self.privacy,
            Category::Fairness       => self.fairness,
            Category::Transparency   => self.transparency,
            Category::Resource       => self.resource,
            Category::Accountability => self.accountability,
            Category::Safety         => self.safety,
        }
    }
}

/// Automatic halt on a sustained rejection rate.
///
/// When enabled, the engine tracks the outcomes of the validations completed
/// within the last `window_ms`.  Once at least `min_samples` are in the window
/// and the fraction rejected exceeds `max_rejection_rate`, the engine
/// triggers a halt on its own behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoHaltPolicy {
    pub enabled: bool,
    pub window_ms: u64,
    pub min_samples: usize,
    pub max_rejection_rate: f64,
}

impl Default for AutoHaltPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            window_ms: 60_000,
            min_samples: 20,
            max_rejection_rate: 0.5,
        }
    }
}

impl AutoHaltPolicy {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.window_ms == 0 {
            return Err(out_of_range("auto_halt.window_ms", 0, "must be > 0"));
        }
        if self.min_samples == 0 {
            return Err(out_of_range("auto_halt.min_samples", 0, "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.max_rejection_rate) {
            return Err(out_of_range(
                "auto_halt.max_rejection_rate",
                self.max_rejection_rate,
                "must be in the range [0, 1)",
            ));
        }
        Ok(())
    }
}

/// Resource ceilings for one agent or team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDefinition {
    pub key: String,
    pub ceilings: ResourceMap,
}

impl BudgetDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), ceilings: ResourceMap::new() }
    }

    pub fn ceiling(mut self, dimension: impl Into<String>, amount: f64) -> Self {
        self.ceilings.insert(dimension.into(), amount);
        self
    }
}

/// Roles granted to one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalDefinition {
    pub id: String,
    pub roles: Vec<Role>,
}

fn out_of_range(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidRange {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}
