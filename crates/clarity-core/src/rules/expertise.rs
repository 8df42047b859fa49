//! Domain expertise terminology.

use serde::{Deserialize, Serialize};

use super::{
    parse_params, to_params, word_count, ParamBag, Rule, RuleConfigurationError, ScoringError,
};
use crate::types::RuleExplanation;

fn default_domain() -> String {
    "general".to_string()
}

/// Parameters for [`DomainExpertiseRule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExpertiseParams {
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Terms whose presence signals domain knowledge
    #[serde(alias = "terms")]
    pub expertise_terms: Vec<String>,
}

/// Combines term coverage and term density into one score.
///
/// `score = min(1, (density * 10 + coverage) / 2)` where density is found
/// terms per word and coverage is the fraction of configured terms found.
#[derive(Debug, Clone)]
pub struct DomainExpertiseRule {
    params: ExpertiseParams,
    lowered: Vec<String>,
}

impl DomainExpertiseRule {
    pub const KIND: &'static str = "domain_expertise";

    pub fn new(params: ExpertiseParams) -> Result<Self, RuleConfigurationError> {
        let lowered: Vec<String> = params
            .expertise_terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        if lowered.is_empty() {
            return Err(RuleConfigurationError::invalid(
                Self::KIND,
                "expertise_terms must contain at least one term",
            ));
        }

        Ok(Self { params, lowered })
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        Self::new(parse_params(Self::KIND, params)?)
    }

    fn found_terms(&self, text: &str) -> Vec<&str> {
        let text = text.to_lowercase();
        self.lowered
            .iter()
            .filter(|t| text.contains(t.as_str()))
            .map(String::as_str)
            .collect()
    }

    fn score_found(&self, found: usize, words: usize) -> f64 {
        let density = if words == 0 {
            0.0
        } else {
            found as f64 / words as f64
        };
        let coverage = found as f64 / self.lowered.len() as f64;
        ((density * 10.0 + coverage) / 2.0).min(1.0)
    }
}

impl Rule for DomainExpertiseRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        to_params(&self.params)
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        Ok(self.score_found(self.found_terms(text).len(), word_count(text)))
    }

    fn explain(&self, text: &str) -> RuleExplanation {
        let found = self.found_terms(text);
        let score = self.score_found(found.len(), word_count(text));
        let domain = &self.params.domain;

        let (reasoning, suggestions) = if score >= 0.7 {
            (format!("Strong {domain} expertise"), vec![])
        } else if score >= 0.4 {
            (
                format!("Moderate {domain} knowledge"),
                vec![format!("Use more {domain}-specific terminology")],
            )
        } else {
            (
                format!("Few {domain} expertise indicators"),
                vec![
                    format!("Introduce core {domain} concepts by name"),
                    "Add technical depth and specificity".to_string(),
                ],
            )
        };

        RuleExplanation {
            kind: Self::KIND.to_string(),
            score,
            reasoning,
            evidence: vec![format!(
                "Expertise terms found: {}/{} ({})",
                found.len(),
                self.lowered.len(),
                if found.is_empty() { "none".to_string() } else { found.join(", ") }
            )],
            suggestions,
        }
    }
}
