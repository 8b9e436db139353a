// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Constraint registry: versioned, copy-on-write rule snapshots.
//!
//! The active rule set lives behind an `Arc` in a `parking_lot::RwLock`.
//! Readers clone the `Arc` under a shared lock held for a single pointer copy
//! and then evaluate against their own immutable snapshot, so a concurrent
//! [`reload`](ConstraintRegistry::reload) never disturbs an in-flight
//! validation.  Reload compiles the new rule set outside the lock and only
//! takes the exclusive lock to swap the pointer.  Reloads are serialised by
//! the history lock.
//!
//! A bounded history of recent snapshots is kept for lookup by version.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::ConfigurationError;
use crate::rules::{ConstraintRule, RuleDefinition};
use crate::types::{Category, DecisionType};

/// An immutable, versioned view of the rule set.
#[derive(Debug)]
pub struct RuleSnapshot {
    version: u64,
    rules: Vec<ConstraintRule>,
    /// Category → indices into `rules`, each list in registry order.
    by_category: BTreeMap<Category, Vec<usize>>,
}

impl RuleSnapshot {
    fn build(version: u64, rules: Vec<ConstraintRule>) -> Self {
        let mut by_category: BTreeMap<Category, Vec<usize>> = BTreeMap::new();
        for (index, rule) in rules.iter().enumerate() {
            by_category.entry(rule.category).or_default().push(index);
        }
        Self { version, rules, by_category }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// All rules in registry order.
    pub fn rules(&self) -> &[ConstraintRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &ConstraintRule> {
        self.by_category
            .get(&category)
            .into_iter()
            .flatten()
            .map(move |&index| &self.rules[index])
    }

    /// Rules relevant to `decision_type`, in registry order.
    pub fn applicable_to(&self, decision_type: DecisionType) -> Vec<&ConstraintRule> {
        let mut indices: Vec<usize> = decision_type
            .relevant_categories()
            .iter()
            .filter_map(|category| self.by_category.get(category))
            .flatten()
            .copied()
            .filter(|&index| self.rules[index].applies_to(decision_type))
            .collect();
        indices.sort_unstable();
        indices.into_iter().map(|index| &self.rules[index]).collect()
    }
}

/// Holds the active rule snapshot and a short history of previous ones.
///
/// ```rust
/// use warden_core::registry::ConstraintRegistry;
/// use warden_core::rules::default_rules;
///
/// let registry = ConstraintRegistry::new(default_rules(), 4).unwrap();
/// let before = registry.current_snapshot();
///
/// let version = registry.reload(Vec::new()).unwrap();
/// assert_eq!(version, before.version() + 1);
///
/// // The snapshot taken earlier still sees the old rules.
/// assert!(!before.is_empty());
/// assert!(registry.current_snapshot().is_empty());
/// ```
#[derive(Debug)]
pub struct ConstraintRegistry {
    current: RwLock<Arc<RuleSnapshot>>,
    history: Mutex<VecDeque<Arc<RuleSnapshot>>>,
    history_depth: usize,
}

impl ConstraintRegistry {
    /// Compile `definitions` and publish them as version 1.
    ///
    /// # Errors
    ///
    /// Any [`ConfigurationError`] raised while compiling the rule set.
    pub fn new(
        definitions: Vec<RuleDefinition>,
        history_depth: usize,
    ) -> Result<Self, ConfigurationError> {
        let snapshot = Arc::new(RuleSnapshot::build(1, compile_all(definitions)?));
        let mut history = VecDeque::new();
        history.push_back(Arc::clone(&snapshot));
        Ok(Self {
            current: RwLock::new(snapshot),
            history: Mutex::new(history),
            history_depth: history_depth.max(1),
        })
    }

    /// Return the active snapshot.
    pub fn current_snapshot(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&*self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Compile and publish a new rule set.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.  The previously active
    /// version stays in effect.
    pub fn reload(&self, definitions: Vec<RuleDefinition>) -> Result<u64, ConfigurationError> {
        self.reload_with(definitions, |_, _| Ok::<(), ConfigurationError>(()))
    }

    /// Like [`reload`](Self::reload), but calls `record` with the version
    /// about to be published and its rule count before publishing.
    ///
    /// Reloads are serialised, so the version passed to `record` is the one
    /// that gets published.  Readers are not blocked while `record` runs.  If
    /// `record` fails nothing is published.
    pub fn reload_with<E, F>(&self, definitions: Vec<RuleDefinition>, record: F) -> Result<u64, E>
    where
        E: From<ConfigurationError>,
        F: FnOnce(u64, usize) -> Result<(), E>,
    {
        let rules = match compile_all(definitions) {
            Ok(rules) => rules,
            Err(err) => {
                warn!(error = %err, active = self.version(), "rule set rejected");
                return Err(err.into());
            }
        };

        let mut history = self.history.lock();
        let version = self.version() + 1;
        record(version, rules.len())?;

        let published = Arc::new(RuleSnapshot::build(version, rules));
        *self.current.write() = Arc::clone(&published);
        history.push_back(Arc::clone(&published));
        while history.len() > self.history_depth {
            history.pop_front();
        }

        info!(version, rules = published.len(), "constraint set published");
        Ok(version)
    }

    /// Look up a retained snapshot by version.
    pub fn snapshot_at(&self, version: u64) -> Option<Arc<RuleSnapshot>> {
        self.history
            .lock()
            .iter()
            .find(|snapshot| snapshot.version == version)
            .cloned()
    }

    /// Versions currently retained, oldest first.
    pub fn versions(&self) -> Vec<u64> {
        self.history.lock().iter().map(|snapshot| snapshot.version).collect()
    }
}

fn compile_all(definitions: Vec<RuleDefinition>) -> Result<Vec<ConstraintRule>, ConfigurationError> {
    let mut seen = HashSet::with_capacity(definitions.len());
    let mut rules = Vec::with_capacity(definitions.len());
    for definition in definitions {
        if !seen.insert(definition.id.clone()) {
            return Err(ConfigurationError::DuplicateRule(definition.id));
        }
        rules.push(ConstraintRule::compile(definition)?);
    }
    Ok(rules)
}
