// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Risk scorer: folds per-rule outcomes into one number in `[0, 1]`.

use crate::config::CategoryWeights;
use crate::types::RuleOutcome;

/// Weighted aggregation of rule outcomes.
///
/// ```text
/// score = Σ w(category) · contribution  /  Σ w(category) · weight
/// ```
///
/// summed over applicable outcomes only.  With nothing applicable the score
/// is `0.0`.  The threshold is the supremum of the approval region: a score
/// exactly equal to it is rejected.
///
/// ```rust
/// use warden_core::config::CategoryWeights;
/// use warden_core::risk::RiskScorer;
///
/// let scorer = RiskScorer::new(CategoryWeights::default(), 0.7);
/// assert!(scorer.exceeds_threshold(0.7));
/// assert!(!scorer.exceeds_threshold(0.69));
/// assert_eq!(scorer.score(&[]), 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct RiskScorer {
    weights: CategoryWeights,
    threshold: f64,
}

impl RiskScorer {
    pub fn new(weights: CategoryWeights, threshold: f64) -> Self {
        Self { weights, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn score(&self, outcomes: &[RuleOutcome]) -> f64 {
        let (actual, possible) = outcomes
            .iter()
            .filter(|outcome| outcome.applicable)
            .fold((0.0, 0.0), |(actual, possible), outcome| {
                let w = self.weights.get(outcome.category);
                (actual + w * outcome.contribution, possible + w * outcome.weight)
            });
        if possible <= 0.0 {
            return 0.0;
        }
        (actual / possible).clamp(0.0, 1.0)
    }

    pub fn exceeds_threshold(&self, score: f64) -> bool {
        score >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, OutcomeKind, Severity};

    fn outcome(category: Category, weight: f64, passed: bool) -> RuleOutcome {
        RuleOutcome {
            rule_id: format!("{category}-rule"),
            kind: OutcomeKind::Rule,
            category,
            severity: Severity::Medium,
            applicable: true,
            passed,
            weight,
            contribution: if passed { 0.0 } else { weight },
            explanation: String::new(),
        }
    }

    #[test]
    fn normalises_by_maximum_possible() {
        let scorer = RiskScorer::new(CategoryWeights::default(), 0.7);
        let outcomes = [
            outcome(Category::Harm, 0.75, false),
            outcome(Category::Safety, 0.25, true),
        ];
        assert!((scorer.score(&outcomes) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn category_weights_scale_contributions() {
        let weights = CategoryWeights { harm: 3.0, ..CategoryWeights::default() };
        let scorer = RiskScorer::new(weights, 0.7);
        let outcomes = [
            outcome(Category::Harm, 0.5, false),
            outcome(Category::Privacy, 0.5, true),
        ];
        assert!((scorer.score(&outcomes) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn inapplicable_outcomes_are_ignored() {
        let scorer = RiskScorer::new(CategoryWeights::default(), 0.7);
        let mut skipped = outcome(Category::Harm, 1.0, false);
        skipped.applicable = false;
        assert_eq!(scorer.score(&[skipped]), 0.0);
    }

    #[test]
    fn zero_weighted_category_cannot_raise_risk() {
        let weights = CategoryWeights { fairness: 0.0, ..CategoryWeights::default() };
        let scorer = RiskScorer::new(weights, 0.7);
        assert_eq!(scorer.score(&[outcome(Category::Fairness, 1.0, false)]), 0.0);
    }
}
