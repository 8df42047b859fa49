//! Citation density.

use lazy_static::lazy_static;
use regex::Regex;

use super::{parse_params, word_count, NoParams, ParamBag, Rule, RuleConfigurationError, ScoringError};
use crate::types::RuleExplanation;

const LOW_DENSITY: f64 = 0.01;
const MEDIUM_DENSITY: f64 = 0.05;

lazy_static! {
    static ref CITATION_PATTERNS: Vec<Regex> = vec![
        // (Author, 2023)
        Regex::new(r"\([A-Za-z]+,?\s+\d{4}\)").unwrap(),
        // [1]
        Regex::new(r"\[[0-9]+\]").unwrap(),
        Regex::new(r"https?://[^\s]+").unwrap(),
        Regex::new(r"doi:\s*[^\s]+").unwrap(),
    ];
}

/// Scores the number of citations relative to text length.
#[derive(Debug, Clone, Default)]
pub struct CitationQualityRule;

impl CitationQualityRule {
    pub const KIND: &'static str = "citation_quality";

    pub fn new() -> Self {
        Self
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        let _: NoParams = parse_params(Self::KIND, params)?;
        Ok(Self)
    }

    fn citations<'t>(&self, text: &'t str) -> Vec<&'t str> {
        CITATION_PATTERNS
            .iter()
            .flat_map(|re| re.find_iter(text).map(|m| m.as_str()))
            .collect()
    }

    fn score_density(count: usize, words: usize) -> f64 {
        let density = if words == 0 {
            0.0
        } else {
            count as f64 / words as f64
        };

        if count == 0 {
            0.0
        } else if density < LOW_DENSITY {
            0.3
        } else if density < MEDIUM_DENSITY {
            0.7
        } else {
            1.0
        }
    }
}

impl Rule for CitationQualityRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        ParamBag::new()
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        Ok(Self::score_density(self.citations(text).len(), word_count(text)))
    }

    fn explain(&self, text: &str) -> RuleExplanation {
        let citations = self.citations(text);
        let score = Self::score_density(citations.len(), word_count(text));

        let (reasoning, suggestions): (&str, Vec<&str>) = if citations.is_empty() {
            (
                "No citations found",
                vec!["Cite sources for key claims", "Link to relevant documentation"],
            )
        } else if score < 0.5 {
            ("Very few citations for the text length", vec!["Cite sources more often"])
        } else if score < 1.0 {
            ("Moderate citation density", vec!["Consider adding sources"])
        } else {
            ("Well cited", vec![])
        };

        RuleExplanation {
            kind: Self::KIND.to_string(),
            score,
            reasoning: reasoning.to_string(),
            evidence: citations
                .iter()
                .take(3)
                .map(|c| format!("Citation: {c}"))
                .collect(),
            suggestions: suggestions.into_iter().map(String::from).collect(),
        }
    }
}
