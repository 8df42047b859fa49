//! Rubrics: named, weighted collections of scoring rules.
//!
//! A rubric is built empty, rules are appended during configuration, and it
//! is read-only from then on. Every scoring method takes `&self`, so the
//! borrow checker rules out mutation while a scoring pass is in flight and
//! an `Arc<Rubric>` can be shared across worker threads.

mod document;
mod feedback;

pub use document::{ConfigFileError, RuleEntry, TemplateDocument};

use std::sync::Arc;

use crate::rules::{builtin, ParamBag, Rule, RuleConfigurationError, RuleRegistry, ScoringError};
use crate::types::{Evaluation, ExplainedEvaluation, RuleScore};

/// A rule paired with its weight.
#[derive(Debug, Clone)]
pub struct WeightedRule {
    rule: Arc<dyn Rule>,
    weight: f64,
}

impl WeightedRule {
    pub fn rule(&self) -> &dyn Rule {
        self.rule.as_ref()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// A named, weighted collection of rules defining a reward function over text.
#[derive(Debug, Clone)]
pub struct Rubric {
    /// Human-readable name
    pub name: String,

    /// Free-text description
    pub description: String,

    rules: Vec<WeightedRule>,
}

impl Default for Rubric {
    fn default() -> Self {
        Self::new("default")
    }
}

impl Rubric {
    /// Create an empty rubric.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Validate parameters for a built-in `kind` and append the rule.
    pub fn add_rule(
        &mut self,
        kind: &str,
        weight: f64,
        params: ParamBag,
    ) -> Result<&mut Self, RuleConfigurationError> {
        self.add_rule_from(builtin(), kind, weight, params)
    }

    /// Like [`Rubric::add_rule`], resolving `kind` in a caller-supplied registry.
    pub fn add_rule_from(
        &mut self,
        registry: &RuleRegistry,
        kind: &str,
        weight: f64,
        params: ParamBag,
    ) -> Result<&mut Self, RuleConfigurationError> {
        self.check_weight(kind, weight)?;
        let rule = registry.build(kind, &params)?;
        self.rules.push(WeightedRule { rule, weight });
        Ok(self)
    }

    /// Append an already-constructed rule.
    pub fn push_rule(
        &mut self,
        rule: impl Rule + 'static,
        weight: f64,
    ) -> Result<&mut Self, RuleConfigurationError> {
        self.check_weight(rule.kind(), weight)?;
        self.rules.push(WeightedRule {
            rule: Arc::new(rule),
            weight,
        });
        Ok(self)
    }

    pub fn rules(&self) -> &[WeightedRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.rules.iter().map(|r| r.weight).sum()
    }

    /// Check rubric-level invariants.
    ///
    /// A rubric may have zero total weight only when it has no rules, and
    /// the total must stay finite.
    pub fn validate(&self) -> Result<(), RuleConfigurationError> {
        let total = self.total_weight();
        if !total.is_finite() {
            return Err(RuleConfigurationError::TotalWeightOverflow(self.name.clone()));
        }
        if !self.rules.is_empty() && total <= 0.0 {
            return Err(RuleConfigurationError::ZeroTotalWeight(self.name.clone()));
        }
        Ok(())
    }

    fn check_weight(&self, kind: &str, weight: f64) -> Result<(), RuleConfigurationError> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(RuleConfigurationError::InvalidWeight {
                kind: kind.to_string(),
                weight,
            });
        }
        if !(self.total_weight() + weight).is_finite() {
            return Err(RuleConfigurationError::TotalWeightOverflow(self.name.clone()));
        }
        Ok(())
    }

    /// Aggregate score only.
    pub fn score(&self, text: &str) -> f64 {
        self.evaluate(text).score
    }

    /// Run every rule against `text`.
    ///
    /// The aggregate is `sum(partial * weight) / sum(weight)`, or 0.0 when the
    /// rubric is empty or carries no weight. A rule that fails to score keeps
    /// its weight, contributes 0.0 and carries a diagnostic.
    pub fn evaluate(&self, text: &str) -> Evaluation {
        if self.rules.is_empty() {
            return Evaluation::empty();
        }

        let mut breakdown = Vec::with_capacity(self.rules.len());
        let mut total_contribution = 0.0;
        let mut total_weight = 0.0;

        for (index, weighted) in self.rules.iter().enumerate() {
            let (partial, diagnostic) = match bounded(weighted.rule.as_ref(), text) {
                Ok(partial) => (partial, None),
                Err(e) => {
                    tracing::warn!(
                        rubric = %self.name,
                        rule = index,
                        kind = weighted.rule.kind(),
                        error = %e,
                        "Rule could not score text, using 0.0"
                    );
                    (0.0, Some(e.to_string()))
                }
            };

            let contribution = partial * weighted.weight;
            total_contribution += contribution;
            total_weight += weighted.weight;

            breakdown.push(RuleScore {
                index,
                kind: weighted.rule.kind().to_string(),
                weight: weighted.weight,
                partial,
                contribution,
                diagnostic,
            });
        }

        let mut weighted = breakdown.iter().filter(|r| r.weight > 0.0);
        let score = match (weighted.next(), weighted.next()) {
            // A one-term weighted mean is the term itself; skip the p*w/w round trip.
            (Some(only), None) => only.partial,
            (Some(_), Some(_)) => total_contribution / total_weight,
            (None, _) => 0.0,
        };

        tracing::debug!(rubric = %self.name, score, rules = breakdown.len(), "Evaluated text");

        Evaluation {
            score,
            total_weight,
            breakdown,
        }
    }

    /// Evaluate with per-rule explanations and overall feedback.
    ///
    /// Each explanation carries the bounded partial from the breakdown, and a
    /// rule that failed to score explains itself with its diagnostic.
    pub fn explain(&self, text: &str) -> ExplainedEvaluation {
        let evaluation = self.evaluate(text);
        let explanations = self
            .rules
            .iter()
            .zip(&evaluation.breakdown)
            .map(|(weighted, scored)| {
                let mut explanation = weighted.rule.explain(text);
                explanation.score = scored.partial;
                if let Some(diagnostic) = &scored.diagnostic {
                    explanation.reasoning = diagnostic.clone();
                }
                explanation
            })
            .collect();
        feedback::assemble(evaluation, explanations)
    }
}

/// Evaluate one rule, enforcing the `[0, 1]` bound.
fn bounded(rule: &dyn Rule, text: &str) -> Result<f64, ScoringError> {
    let score = rule.evaluate(text)?;
    if !score.is_finite() {
        return Err(ScoringError::NonFinite {
            kind: rule.kind().to_string(),
        });
    }
    Ok(score.clamp(0.0, 1.0))
}
