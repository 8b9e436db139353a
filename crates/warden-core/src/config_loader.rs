// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Configuration loader for [`GovernanceEngine`].
//!
//! Supports two load strategies:
//!
//! 1. **TOML file**: [`load_config`] reads a whole [`GovernanceFile`]
//!    (engine tuning, principals, rules and budgets).
//! 2. **Environment variables**: [`load_config_from_env`] overlays
//!    `WARDEN_`-prefixed variables on an [`EngineConfig`].
//!
//! # File format
//!
//! ```toml
//! [engine]
//! risk_threshold = 0.6
//!
//! [engine.auto_halt]
//! enabled = true
//!
//! [[principals]]
//! id    = "admin-1"
//! roles = ["administrator"]
//!
//! [[rules]]
//! id       = "privacy.consent_required"
//! category = "privacy"
//! severity = "critical"
//! when     = [{ field = "personal_data", equals = true }]
//! check    = { kind = "predicate", field = "consent", expected = true }
//!
//! [[budgets]]
//! key      = "team-a"
//! ceilings = { cpu_percent = 100.0 }
//! ```
//!
//! # Environment variables
//!
//! | Variable                        | Type    | Field                          |
//! |---------------------------------|---------|--------------------------------|
//! | `WARDEN_RISK_THRESHOLD`         | float   | `risk_threshold`               |
//! | `WARDEN_PASS_ON_MISSING_BUDGET` | boolean | `pass_on_missing_budget`       |
//! | `WARDEN_AUTO_HALT_ENABLED`      | boolean | `auto_halt.enabled`            |
//! | `WARDEN_AUTO_HALT_WINDOW_MS`    | integer | `auto_halt.window_ms`          |
//! | `WARDEN_AUTO_HALT_MAX_RATE`     | float   | `auto_halt.max_rejection_rate` |

#![cfg(feature = "config-loader")]

use std::fs;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::AccessPolicy;
use crate::config::{BudgetDefinition, EngineConfig, PrincipalDefinition};
use crate::engine::{EngineBuilder, GovernanceEngine};
use crate::error::{ConfigurationError, Result};
use crate::rules::RuleDefinition;
use crate::storage::AuditStore;

// ---------------------------------------------------------------------------
// GovernanceFile
// ---------------------------------------------------------------------------

/// Everything needed to stand up an engine, as read from one TOML file.
///
/// Every section is optional; an empty file yields default tuning, no rules,
/// no principals and no budgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceFile {
    pub engine: EngineConfig,
    pub principals: Vec<PrincipalDefinition>,
    pub rules: Vec<RuleDefinition>,
    pub budgets: Vec<BudgetDefinition>,
}

impl GovernanceFile {
    pub fn access_policy(&self) -> AccessPolicy {
        let mut policy = AccessPolicy::default();
        for principal in &self.principals {
            for role in &principal.roles {
                policy.grant(principal.id.clone(), *role);
            }
        }
        policy
    }

    /// A builder pre-loaded with this file's contents.  The audit store and
    /// clock are left for the caller.
    pub fn into_builder(self) -> EngineBuilder {
        let access = self.access_policy();
        let builder = GovernanceEngine::builder()
            .config(self.engine)
            .rules(self.rules)
            .access(access);
        self.budgets.into_iter().fold(builder, EngineBuilder::budget)
    }
}

impl GovernanceEngine {
    /// Build an engine from a loaded [`GovernanceFile`] over `store`.
    ///
    /// # Errors
    ///
    /// As [`EngineBuilder::build`].
    pub fn from_file_config(file: GovernanceFile, store: impl AuditStore + 'static) -> Result<Self> {
        file.into_builder().store(store).build()
    }
}

// ---------------------------------------------------------------------------
// TOML loader
// ---------------------------------------------------------------------------

/// Load a [`GovernanceFile`] from a TOML file.
///
/// The engine section is range-checked before returning; rules and budgets
/// are checked when the engine is built.
///
/// # Errors
///
/// [`ConfigurationError::FileRead`], [`ConfigurationError::TomlParse`], or
/// [`ConfigurationError::InvalidRange`].
///
/// # Example
///
/// ```rust,no_run
/// use warden_core::config_loader::load_config;
///
/// let file = load_config("/etc/warden/governance.toml").unwrap();
/// println!("risk threshold: {}", file.engine.risk_threshold);
/// ```
pub fn load_config(path: &str) -> std::result::Result<GovernanceFile, ConfigurationError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigurationError::FileRead {
        path: path.to_owned(),
        source,
    })?;
    let file = parse_config(&content)?;
    debug!(
        path,
        rules = file.rules.len(),
        principals = file.principals.len(),
        budgets = file.budgets.len(),
        "loaded governance file"
    );
    Ok(file)
}

/// Parse a [`GovernanceFile`] from TOML text.
pub fn parse_config(content: &str) -> std::result::Result<GovernanceFile, ConfigurationError> {
    let file: GovernanceFile = toml::from_str(content)?;
    file.engine.validate()?;
    Ok(file)
}

// ---------------------------------------------------------------------------
// Environment variable loader
// ---------------------------------------------------------------------------

/// [`EngineConfig::default`] overlaid with the `WARDEN_` environment
/// variables that are set.
///
/// # Errors
///
/// [`ConfigurationError::ParseField`] for a value that does not parse, or
/// [`ConfigurationError::InvalidRange`] if the result fails validation.
pub fn load_config_from_env() -> std::result::Result<EngineConfig, ConfigurationError> {
    apply_overrides(EngineConfig::default(), |key| std::env::var(key).ok())
}

/// Overlay variables on `base`, reading them through `lookup`.
///
/// ```rust
/// use warden_core::config::EngineConfig;
/// use warden_core::config_loader::apply_overrides;
///
/// let config = apply_overrides(EngineConfig::default(), |key| match key {
///     "WARDEN_RISK_THRESHOLD" => Some("0.55".to_string()),
///     "WARDEN_AUTO_HALT_ENABLED" => Some("on".to_string()),
///     _ => None,
/// })
/// .unwrap();
/// assert_eq!(config.risk_threshold, 0.55);
/// assert!(config.auto_halt.enabled);
/// ```
pub fn apply_overrides<F>(
    mut config: EngineConfig,
    lookup: F,
) -> std::result::Result<EngineConfig, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = read_number(&lookup, "WARDEN_RISK_THRESHOLD")? {
        config.risk_threshold = value;
    }
    if let Some(value) = read_bool(&lookup, "WARDEN_PASS_ON_MISSING_BUDGET")? {
        config.pass_on_missing_budget = value;
    }
    if let Some(value) = read_bool(&lookup, "WARDEN_AUTO_HALT_ENABLED")? {
        config.auto_halt.enabled = value;
    }
    if let Some(value) = read_number(&lookup, "WARDEN_AUTO_HALT_WINDOW_MS")? {
        config.auto_halt.window_ms = value;
    }
    if let Some(value) = read_number(&lookup, "WARDEN_AUTO_HALT_MAX_RATE")? {
        config.auto_halt.max_rejection_rate = value;
    }
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_number<T, F>(lookup: &F, key: &str) -> std::result::Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: ToString,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|source| ConfigurationError::ParseField {
            field: key.to_owned(),
            value: raw,
            reason: source.to_string(),
        })
}

fn read_bool<F>(lookup: &F, key: &str) -> std::result::Result<Option<bool>, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigurationError::ParseField {
            field: key.to_owned(),
            value: raw,
            reason: "expected one of: true/false, 1/0, yes/no, on/off".into(),
        }),
    }
}
