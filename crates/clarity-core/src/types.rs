//! Core types for rubric evaluation.
//!
//! These are the result structures returned by rubrics and the scoring
//! engine. All of them serialize, so callers can log or persist breakdowns.

use serde::{Deserialize, Serialize};

/// Result of evaluating a rubric against one text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    /// Weighted mean of the partial scores, or 0.0 for an empty rubric
    pub score: f64,

    /// Sum of rule weights
    pub total_weight: f64,

    /// Per-rule detail in rubric order
    pub breakdown: Vec<RuleScore>,
}

impl Evaluation {
    /// Evaluation of a rubric with no rules.
    pub fn empty() -> Self {
        Self {
            score: 0.0,
            total_weight: 0.0,
            breakdown: vec![],
        }
    }

    /// True when at least one rule could not score the text.
    pub fn has_diagnostics(&self) -> bool {
        self.breakdown.iter().any(|r| r.diagnostic.is_some())
    }

    /// Rules that could not score the text, with their diagnostics.
    pub fn diagnostics(&self) -> impl Iterator<Item = (&RuleScore, &str)> {
        self.breakdown
            .iter()
            .filter_map(|r| r.diagnostic.as_deref().map(|d| (r, d)))
    }
}

/// Score of a single rule within an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleScore {
    /// Position of the rule in the rubric
    pub index: usize,

    /// Kind tag of the rule
    pub kind: String,

    pub weight: f64,

    /// Bounded partial score in `[0.0, 1.0]`
    pub partial: f64,

    /// `partial * weight`
    pub contribution: f64,

    /// Set when the rule could not score the text and fell back to 0.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Human-readable account of one rule's score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleExplanation {
    pub kind: String,
    pub score: f64,
    pub reasoning: String,

    #[serde(default)]
    pub evidence: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Coarse interpretation of an aggregate score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    VeryPoor,
    Poor,
    Moderate,
    Good,
    Excellent,
}

impl ScoreBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            ScoreBand::Excellent
        } else if score >= 0.7 {
            ScoreBand::Good
        } else if score >= 0.5 {
            ScoreBand::Moderate
        } else if score >= 0.3 {
            ScoreBand::Poor
        } else {
            ScoreBand::VeryPoor
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScoreBand::Excellent => "Excellent - text meets or exceeds all criteria",
            ScoreBand::Good => "Good - text meets most criteria with minor gaps",
            ScoreBand::Moderate => "Moderate - text meets some criteria with room to improve",
            ScoreBand::Poor => "Poor - text misses most criteria",
            ScoreBand::VeryPoor => "Very poor - text misses the basic criteria",
        }
    }
}

/// Overall feedback assembled from per-rule explanations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,

    /// Deduplicated, in first-seen order
    pub suggestions: Vec<String>,

    pub interpretation: ScoreBand,
}

/// Evaluation plus explanations and feedback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplainedEvaluation {
    pub evaluation: Evaluation,
    pub explanations: Vec<RuleExplanation>,
    pub feedback: Feedback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bands() {
        assert_eq!(ScoreBand::from_score(1.0), ScoreBand::Excellent);
        assert_eq!(ScoreBand::from_score(0.9), ScoreBand::Excellent);
        assert_eq!(ScoreBand::from_score(0.75), ScoreBand::Good);
        assert_eq!(ScoreBand::from_score(0.5), ScoreBand::Moderate);
        assert_eq!(ScoreBand::from_score(0.3), ScoreBand::Poor);
        assert_eq!(ScoreBand::from_score(0.0), ScoreBand::VeryPoor);
    }

    #[test]
    fn test_diagnostics_iterator() {
        let evaluation = Evaluation {
            score: 0.5,
            total_weight: 2.0,
            breakdown: vec![
                RuleScore {
                    index: 0,
                    kind: "a".into(),
                    weight: 1.0,
                    partial: 1.0,
                    contribution: 1.0,
                    diagnostic: None,
                },
                RuleScore {
                    index: 1,
                    kind: "b".into(),
                    weight: 1.0,
                    partial: 0.0,
                    contribution: 0.0,
                    diagnostic: Some("boom".into()),
                },
            ],
        };

        assert!(evaluation.has_diagnostics());
        let diags: Vec<_> = evaluation.diagnostics().map(|(r, d)| (r.index, d)).collect();
        assert_eq!(diags, vec![(1, "boom")]);
        assert!(!Evaluation::empty().has_diagnostics());
    }
}
