//! Readability against a target grade level.
//!
//! Grade is the Flesch-Kincaid formula over a vowel-group syllable estimate.

use serde::{Deserialize, Serialize};

use super::{parse_params, sentences, to_params, words, ParamBag, Rule, RuleConfigurationError, ScoringError};
use crate::types::RuleExplanation;

fn default_target_grade() -> f64 {
    8.0
}

fn default_tolerance() -> f64 {
    2.0
}

/// Parameters for [`ReadabilityRule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReadabilityParams {
    #[serde(default = "default_target_grade")]
    pub target_grade_level: f64,

    /// Grade distance that still counts as on target
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for ReadabilityParams {
    fn default() -> Self {
        Self {
            target_grade_level: default_target_grade(),
            tolerance: default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TextMetrics {
    words: usize,
    sentences: usize,
    syllables: usize,
}

impl TextMetrics {
    fn words_per_sentence(&self) -> f64 {
        self.words as f64 / self.sentences as f64
    }

    fn syllables_per_word(&self) -> f64 {
        self.syllables as f64 / self.words as f64
    }

    fn grade(&self) -> f64 {
        0.39 * self.words_per_sentence() + 11.8 * self.syllables_per_word() - 15.59
    }

    fn reading_ease(&self) -> f64 {
        206.835 - 1.015 * self.words_per_sentence() - 84.6 * self.syllables_per_word()
    }
}

/// Vowel groups, less a silent trailing `e`, at least one.
fn syllables(word: &str) -> usize {
    let mut count = 0;
    let mut in_group = false;
    for c in word.chars() {
        let vowel = matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !in_group {
            count += 1;
        }
        in_group = vowel;
    }
    if count > 1 && word.ends_with('e') && !word.ends_with("le") {
        count -= 1;
    }
    count.max(1)
}

/// Full score within `tolerance` of the target grade, tapering outside it.
#[derive(Debug, Clone)]
pub struct ReadabilityRule {
    params: ReadabilityParams,
}

impl ReadabilityRule {
    pub const KIND: &'static str = "readability";

    pub fn new(params: ReadabilityParams) -> Result<Self, RuleConfigurationError> {
        if !params.target_grade_level.is_finite() {
            return Err(RuleConfigurationError::invalid(
                Self::KIND,
                "target_grade_level must be finite",
            ));
        }
        if !(params.tolerance.is_finite() && params.tolerance > 0.0) {
            return Err(RuleConfigurationError::invalid(
                Self::KIND,
                format!("tolerance must be positive, got {}", params.tolerance),
            ));
        }
        Ok(Self { params })
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        Self::new(parse_params(Self::KIND, params)?)
    }

    fn metrics(&self, text: &str) -> Result<TextMetrics, ScoringError> {
        let tokens = words(text);
        if tokens.is_empty() {
            return Err(ScoringError::Unclassifiable {
                kind: Self::KIND.to_string(),
                reason: "text has no words".to_string(),
            });
        }
        Ok(TextMetrics {
            words: tokens.len(),
            sentences: sentences(text).len().max(1),
            syllables: tokens.iter().map(|w| syllables(w)).sum(),
        })
    }

    fn score_grade(&self, grade: f64) -> f64 {
        let diff = (grade - self.params.target_grade_level).abs();
        let tolerance = self.params.tolerance;
        if diff <= tolerance {
            1.0 - (diff / tolerance) * 0.3
        } else {
            (0.7 - (diff - tolerance) * 0.1).max(0.0)
        }
    }
}

impl Rule for ReadabilityRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        to_params(&self.params)
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        let metrics = self.metrics(text)?;
        Ok(self.score_grade(metrics.grade()))
    }

    fn explain(&self, text: &str) -> RuleExplanation {
        let metrics = match self.metrics(text) {
            Ok(metrics) => metrics,
            Err(e) => {
                return RuleExplanation {
                    kind: Self::KIND.to_string(),
                    score: 0.0,
                    reasoning: e.to_string(),
                    evidence: vec![],
                    suggestions: vec!["Write at least one full sentence".to_string()],
                }
            }
        };

        let grade = metrics.grade();
        let target = self.params.target_grade_level;
        let evidence = vec![
            format!("Flesch reading ease: {:.1}", metrics.reading_ease()),
            format!("Flesch-Kincaid grade: {grade:.1}"),
            format!("Target grade: {target}"),
        ];

        let (reasoning, suggestions) = if (grade - target).abs() <= self.params.tolerance {
            (format!("Readability suits grade {target}"), vec![])
        } else if grade > target {
            (
                format!("Too complex for the audience (grade {grade:.1} vs {target})"),
                vec![
                    "Use shorter sentences".to_string(),
                    "Replace complex words with simpler ones".to_string(),
                ],
            )
        } else {
            (
                format!("Too simple for the audience (grade {grade:.1} vs {target})"),
                vec![
                    "Use more precise vocabulary".to_string(),
                    "Combine related ideas into fuller sentences".to_string(),
                ],
            )
        };

        RuleExplanation {
            kind: Self::KIND.to_string(),
            score: self.score_grade(grade),
            reasoning,
            evidence,
            suggestions,
        }
    }
}
