//! Argument structure indicators.

use lazy_static::lazy_static;

use super::{parse_params, NoParams, ParamBag, Rule, RuleConfigurationError, ScoringError};
use crate::types::RuleExplanation;

const CLAIM_WEIGHT: f64 = 0.3;
const EVIDENCE_WEIGHT: f64 = 0.4;
const COUNTER_WEIGHT: f64 = 0.3;
const BALANCE_BONUS: f64 = 0.1;

lazy_static! {
    static ref CLAIM_INDICATORS: Vec<&'static str> =
        vec!["therefore", "thus", "hence", "consequently", "as a result"];

    static ref EVIDENCE_INDICATORS: Vec<&'static str> =
        vec!["because", "since", "given that", "due to", "for example", "such as"];

    static ref COUNTER_INDICATORS: Vec<&'static str> =
        vec!["however", "but", "although", "despite", "on the other hand"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndicatorCounts {
    claims: usize,
    evidence: usize,
    counters: usize,
}

fn count(text: &str, indicators: &[&str]) -> usize {
    indicators.iter().filter(|i| text.contains(*i)).count()
}

/// Rewards text that states claims, backs them, and weighs counter-arguments.
#[derive(Debug, Clone, Default)]
pub struct ArgumentStructureRule;

impl ArgumentStructureRule {
    pub const KIND: &'static str = "argument_structure";

    pub fn new() -> Self {
        Self
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        let _: NoParams = parse_params(Self::KIND, params)?;
        Ok(Self)
    }

    fn counts(&self, text: &str) -> IndicatorCounts {
        let text = text.to_lowercase();
        IndicatorCounts {
            claims: count(&text, &CLAIM_INDICATORS),
            evidence: count(&text, &EVIDENCE_INDICATORS),
            counters: count(&text, &COUNTER_INDICATORS),
        }
    }

    fn score_counts(counts: IndicatorCounts) -> f64 {
        let mut score = 0.0;
        if counts.claims > 0 {
            score += CLAIM_WEIGHT;
        }
        if counts.evidence > 0 {
            score += EVIDENCE_WEIGHT;
        }
        if counts.counters > 0 {
            score += COUNTER_WEIGHT;
        }
        if counts.claims > 0 && counts.evidence > 0 {
            score += BALANCE_BONUS;
        }
        score.min(1.0)
    }
}

impl Rule for ArgumentStructureRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        ParamBag::new()
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        Ok(Self::score_counts(self.counts(text)))
    }

    fn explain(&self, text: &str) -> RuleExplanation {
        let counts = self.counts(text);
        let score = Self::score_counts(counts);

        let mut evidence = Vec::new();
        let mut suggestions = Vec::new();

        if counts.claims > 0 {
            evidence.push(format!("Found {} claim indicators", counts.claims));
        } else {
            suggestions.push("State conclusions explicitly (therefore, thus)".to_string());
        }
        if counts.evidence > 0 {
            evidence.push(format!("Found {} evidence indicators", counts.evidence));
        } else {
            suggestions.push("Support claims with reasons or examples (because, for example)".to_string());
        }
        if counts.counters > 0 {
            evidence.push(format!("Found {} counter-argument indicators", counts.counters));
        } else {
            suggestions.push("Address counter-arguments (however, although)".to_string());
        }

        let reasoning = if score >= 0.8 {
            "Strong argumentative structure"
        } else if score >= 0.5 {
            "Moderate argumentative structure"
        } else {
            "Weak or missing argumentative structure"
        };

        RuleExplanation {
            kind: Self::KIND.to_string(),
            score,
            reasoning: reasoning.to_string(),
            evidence,
            suggestions,
        }
    }
}
