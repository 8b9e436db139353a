// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Resource budget arbitration.
//!
//! [`ResourceArbiter`] exposes five operations:
//!
//! * [`define_budget`](ResourceArbiter::define_budget): set the ceilings for an agent or team
//! * [`check`](ResourceArbiter::check)                : non-committing availability check
//! * [`reserve`](ResourceArbiter::reserve)            : atomic check-and-commit
//! * [`release`](ResourceArbiter::release)            : return committed usage to the pool
//! * [`usage`](ResourceArbiter::usage)                : snapshot of one budget
//!
//! Each budget key has its own lock.  Reservations against different keys
//! never contend, and reservations against the same key are linearizable:
//! the headroom test and the commit happen under one critical section, so
//! concurrent callers can never jointly exceed a ceiling.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::BudgetDefinition;
use crate::error::{ConfigurationError, EngineError, ResourceError};
use crate::types::{ResourceBudget, ResourceCheck, ResourceMap, Shortfall};

/// Tracks ceilings and committed usage per budget key.
///
/// # Examples
///
/// ```rust
/// use warden_core::config::BudgetDefinition;
/// use warden_core::resources::ResourceArbiter;
/// use warden_core::types::ResourceMap;
///
/// let arbiter = ResourceArbiter::new(true);
/// arbiter
///     .define_budget(BudgetDefinition::new("team-a").ceiling("cpu_percent", 100.0))
///     .unwrap();
///
/// let request = ResourceMap::from([("cpu_percent".to_string(), 60.0)]);
/// assert!(arbiter.reserve("team-a", &request).is_ok());
/// // Only 40 left.
/// assert!(arbiter.reserve("team-a", &request).is_err());
///
/// arbiter.release("team-a", &request).unwrap();
/// assert!(arbiter.reserve("team-a", &request).is_ok());
/// ```
#[derive(Debug)]
pub struct ResourceArbiter {
    budgets: DashMap<String, Arc<Mutex<ResourceBudget>>>,
    pass_on_missing_budget: bool,
}

impl ResourceArbiter {
    /// Create an arbiter with no budgets.
    ///
    /// `pass_on_missing_budget` decides what happens to a request against a
    /// key or dimension that has no ceiling: `true` treats it as unlimited,
    /// `false` treats it as having zero headroom.
    pub fn new(pass_on_missing_budget: bool) -> Self {
        Self {
            budgets: DashMap::new(),
            pass_on_missing_budget,
        }
    }

    /// Define a new budget, or replace the ceilings of an existing one.
    ///
    /// Committed usage is preserved across a redefinition.
    ///
    /// # Errors
    ///
    /// * [`ConfigurationError::InvalidBudget`] for an empty key or a negative
    ///   or non-finite ceiling.
    /// * [`ResourceError::CeilingBelowCommitted`] if a new ceiling is lower
    ///   than usage already committed in that dimension.
    pub fn define_budget(&self, definition: BudgetDefinition) -> Result<(), EngineError> {
        self.define_budget_with(definition, || Ok::<(), EngineError>(()))
    }

    /// Like [`define_budget`](Self::define_budget), but calls `record` once
    /// the definition has been validated and before it takes effect.
    ///
    /// Definitions of one key are serialised, so records appear in the order
    /// the ceilings are applied.  If `record` fails the budget is left exactly
    /// as it was, and a key that did not exist is not created.
    pub fn define_budget_with<E, F>(&self, definition: BudgetDefinition, record: F) -> Result<(), E>
    where
        E: From<ConfigurationError> + From<ResourceError>,
        F: FnOnce() -> Result<(), E>,
    {
        let BudgetDefinition { key, ceilings } = definition;
        if key.trim().is_empty() {
            return Err(ConfigurationError::InvalidBudget {
                key,
                reason: "budget key is empty".into(),
            }
            .into());
        }
        if let Some((dimension, ceiling)) = ceilings
            .iter()
            .find(|(_, ceiling)| !ceiling.is_finite() || **ceiling < 0.0)
        {
            return Err(ConfigurationError::InvalidBudget {
                reason: format!("ceiling {ceiling} for '{dimension}' must be a finite number >= 0"),
                key,
            }
            .into());
        }

        let slot = match self.budgets.entry(key.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                // Nothing is committed against a new key; holding the entry
                // keeps a concurrent definition of it out until this one lands.
                record()?;
                entry.insert(Arc::new(Mutex::new(ResourceBudget::new(key.clone(), ceilings))));
                info!(%key, "resource budget defined");
                return Ok(());
            }
        };

        let mut budget = slot.lock();
        for (dimension, ceiling) in &ceilings {
            let committed = budget.committed(dimension);
            if *ceiling < committed {
                return Err(ResourceError::CeilingBelowCommitted {
                    key,
                    dimension: dimension.clone(),
                    ceiling: *ceiling,
                    committed,
                }
                .into());
            }
        }
        record()?;
        budget.ceilings = ceilings;
        info!(key = %budget.key, dimensions = budget.ceilings.len(), "resource budget redefined");
        Ok(())
    }

    /// Report whether `request` would fit in `key`'s headroom right now.
    ///
    /// Does **not** modify any state; the answer may be stale by the time
    /// the caller acts on it.  Use [`reserve`](Self::reserve) to commit.
    pub fn check(&self, key: &str, request: &ResourceMap) -> ResourceCheck {
        let shortfalls = match self.slot(key) {
            Some(slot) => self.shortfalls(&slot.lock(), request),
            None => self.missing_budget_shortfalls(request),
        };
        ResourceCheck {
            key: key.into(),
            granted: shortfalls.is_empty(),
            shortfalls,
        }
    }

    /// Atomically check and commit `request` against `key`.
    ///
    /// Either every dimension is committed or none is.
    ///
    /// # Errors
    ///
    /// * [`ResourceError::InvalidAmount`] for a negative or non-finite amount.
    /// * [`ResourceError::Exhausted`] if any dimension lacks headroom.
    pub fn reserve(&self, key: &str, request: &ResourceMap) -> Result<(), ResourceError> {
        validate_amounts(request)?;

        let Some(slot) = self.slot(key) else {
            let shortfalls = self.missing_budget_shortfalls(request);
            if shortfalls.is_empty() {
                return Ok(());
            }
            return Err(ResourceError::Exhausted { key: key.into(), shortfalls });
        };

        let mut budget = slot.lock();
        let shortfalls = self.shortfalls(&budget, request);
        if !shortfalls.is_empty() {
            debug!(key, ?shortfalls, "reservation refused");
            return Err(ResourceError::Exhausted { key: key.into(), shortfalls });
        }
        for (dimension, amount) in request {
            if budget.ceilings.contains_key(dimension) {
                *budget.committed.entry(dimension.clone()).or_insert(0.0) += amount;
            }
        }
        debug!(key, "reservation committed");
        Ok(())
    }

    /// Return `request` to `key`'s available pool.
    ///
    /// Releasing more than is committed saturates at zero and logs a
    /// warning.  Releasing against an unknown key is a no-op.
    ///
    /// # Errors
    ///
    /// [`ResourceError::InvalidAmount`] for a negative or non-finite amount.
    pub fn release(&self, key: &str, request: &ResourceMap) -> Result<(), ResourceError> {
        validate_amounts(request)?;
        let Some(slot) = self.slot(key) else {
            return Ok(());
        };

        let mut budget = slot.lock();
        for (dimension, amount) in request {
            let Some(committed) = budget.committed.get_mut(dimension) else {
                continue;
            };
            if *amount > *committed {
                warn!(key, dimension = %dimension, amount, committed = *committed,
                    "release exceeds committed usage; clamping to zero");
                *committed = 0.0;
            } else {
                *committed -= amount;
            }
        }
        Ok(())
    }

    /// Snapshot of `key`'s ceilings and committed usage.
    pub fn usage(&self, key: &str) -> Option<ResourceBudget> {
        self.slot(key).map(|slot| slot.lock().clone())
    }

    /// All defined budget keys, sorted.
    pub fn budget_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.budgets.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    // Clone the per-key handle out of the map so the shard lock is released
    // before the budget lock is taken.
    fn slot(&self, key: &str) -> Option<Arc<Mutex<ResourceBudget>>> {
        self.budgets.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn shortfalls(&self, budget: &ResourceBudget, request: &ResourceMap) -> Vec<Shortfall> {
        request
            .iter()
            .filter_map(|(dimension, &requested)| {
                let available = match budget.available(dimension) {
                    Some(available) => available,
                    None if self.pass_on_missing_budget => return None,
                    None => 0.0,
                };
                (requested > available).then(|| Shortfall {
                    dimension: dimension.clone(),
                    requested,
                    available,
                })
            })
            .collect()
    }

    fn missing_budget_shortfalls(&self, request: &ResourceMap) -> Vec<Shortfall> {
        if self.pass_on_missing_budget {
            return Vec::new();
        }
        request
            .iter()
            .filter(|&(_, &requested)| requested > 0.0)
            .map(|(dimension, &requested)| Shortfall {
                dimension: dimension.clone(),
                requested,
                available: 0.0,
            })
            .collect()
    }
}

fn validate_amounts(request: &ResourceMap) -> Result<(), ResourceError> {
    match request.iter().find(|(_, amount)| !amount.is_finite() || **amount < 0.0) {
        Some((dimension, amount)) => Err(ResourceError::InvalidAmount {
            dimension: dimension.clone(),
            amount: *amount,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pairs: &[(&str, f64)]) -> ResourceMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn arbiter_with(key: &str, dimension: &str, ceiling: f64) -> ResourceArbiter {
        let arbiter = ResourceArbiter::new(true);
        arbiter
            .define_budget(BudgetDefinition::new(key).ceiling(dimension, ceiling))
            .unwrap();
        arbiter
    }

    #[test]
    fn oversized_request_commits_nothing() {
        let arbiter = arbiter_with("team-a", "cpu_percent", 100.0);
        let err = arbiter.reserve("team-a", &request(&[("cpu_percent", 150.0)])).unwrap_err();
        match err {
            ResourceError::Exhausted { key, shortfalls } => {
                assert_eq!(key, "team-a");
                assert_eq!(shortfalls[0].available, 100.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(arbiter.usage("team-a").unwrap().committed("cpu_percent"), 0.0);
    }

    #[test]
    fn reservation_is_all_or_nothing_across_dimensions() {
        let arbiter = ResourceArbiter::new(true);
        arbiter
            .define_budget(
                BudgetDefinition::new("agent-9")
                    .ceiling("cpu_percent", 50.0)
                    .ceiling("memory_mb", 256.0),
            )
            .unwrap();
        let result = arbiter.reserve(
            "agent-9",
            &request(&[("cpu_percent", 10.0), ("memory_mb", 512.0)]),
        );
        assert!(result.is_err());
        let usage = arbiter.usage("agent-9").unwrap();
        assert_eq!(usage.committed("cpu_percent"), 0.0);
        assert_eq!(usage.committed("memory_mb"), 0.0);
    }

    #[test]
    fn missing_budget_follows_configuration() {
        let open = ResourceArbiter::new(true);
        assert!(open.reserve("nobody", &request(&[("gpu", 4.0)])).is_ok());
        assert!(open.check("nobody", &request(&[("gpu", 4.0)])).granted);

        let strict = ResourceArbiter::new(false);
        let check = strict.check("nobody", &request(&[("gpu", 4.0)]));
        assert!(!check.granted);
        assert_eq!(check.shortfalls.len(), 1);
        assert!(strict.reserve("nobody", &request(&[("gpu", 4.0)])).is_err());
    }

    #[test]
    fn release_saturates_at_zero() {
        let arbiter = arbiter_with("k", "memory_mb", 100.0);
        arbiter.reserve("k", &request(&[("memory_mb", 30.0)])).unwrap();
        arbiter.release("k", &request(&[("memory_mb", 50.0)])).unwrap();
        assert_eq!(arbiter.usage("k").unwrap().committed("memory_mb"), 0.0);
        assert!(arbiter.release("unknown", &request(&[("memory_mb", 1.0)])).is_ok());
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let arbiter = arbiter_with("k", "cpu_percent", 100.0);
        assert!(matches!(
            arbiter.reserve("k", &request(&[("cpu_percent", -5.0)])),
            Err(ResourceError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn redefinition_keeps_usage_and_guards_ceiling() {
        let arbiter = arbiter_with("k", "cpu_percent", 100.0);
        arbiter.reserve("k", &request(&[("cpu_percent", 70.0)])).unwrap();

        let err = arbiter
            .define_budget(BudgetDefinition::new("k").ceiling("cpu_percent", 50.0))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Resource(ResourceError::CeilingBelowCommitted { .. })
        ));

        arbiter
            .define_budget(BudgetDefinition::new("k").ceiling("cpu_percent", 80.0))
            .unwrap();
        let usage = arbiter.usage("k").unwrap();
        assert_eq!(usage.committed("cpu_percent"), 70.0);
        assert_eq!(usage.available("cpu_percent"), Some(10.0));
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let arbiter = ResourceArbiter::new(true);
        assert!(arbiter.define_budget(BudgetDefinition::new(" ")).is_err());
        assert!(arbiter
            .define_budget(BudgetDefinition::new("k").ceiling("cpu", f64::NAN))
            .is_err());
        assert!(arbiter.budget_keys().is_empty());
    }
}
