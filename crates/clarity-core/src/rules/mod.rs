//! Scoring rules.
//!
//! A rule is a single named, parameterized scorer over a piece of text. Every
//! rule kind implements the one [`Rule`] capability; the rubric and the
//! scoring engine never look past it.
//!
//! ## Construction vs. evaluation
//!
//! - Parameters are validated when a rule is built. Bad ranges, empty
//!   phrases and patterns that do not compile fail with
//!   [`RuleConfigurationError`] and never reach evaluation.
//! - Evaluation never aborts a batch. A rule that cannot classify a text
//!   returns a [`ScoringError`]; the rubric turns it into a 0.0 partial score
//!   with a diagnostic attached.
//!
//! Parameters arrive as a loose [`ParamBag`] only at the deserialization
//! boundary. Each kind immediately converts the bag into its own typed
//! parameter struct.

mod argument;
mod citation;
mod coherence;
mod expertise;
mod overlap;
mod phrase;
mod readability;
mod regex_match;
mod registry;
mod sentiment;
mod word_count;

pub use argument::ArgumentStructureRule;
pub use citation::CitationQualityRule;
pub use coherence::CoherenceRule;
pub use expertise::{DomainExpertiseRule, ExpertiseParams};
pub use overlap::{OverlapParams, WordOverlapRule};
pub use phrase::{PhraseParams, PhraseRule};
pub use readability::{ReadabilityParams, ReadabilityRule};
pub use regex_match::{RegexParams, RegexRule};
pub use registry::{builtin, RuleConstructor, RuleRegistry};
pub use sentiment::{SentimentParams, SentimentRule};
pub use word_count::{WordCountParams, WordCountRule};

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::types::RuleExplanation;

/// Generic parameter mapping used by the structured template form.
pub type ParamBag = serde_json::Map<String, serde_json::Value>;

/// Invalid rule or rubric configuration, detected at construction time.
#[derive(Error, Debug)]
pub enum RuleConfigurationError {
    #[error("Unknown rule kind: {0}")]
    UnknownKind(String),

    #[error("Invalid parameters for `{kind}`: {reason}")]
    InvalidParams { kind: String, reason: String },

    #[error("Invalid pattern for `{kind}`: {source}")]
    InvalidPattern {
        kind: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid weight {weight} for `{kind}`: weights must be finite and non-negative")]
    InvalidWeight { kind: String, weight: f64 },

    #[error("Rubric `{0}` has rules but every weight is zero")]
    ZeroTotalWeight(String),

    #[error("Rubric `{0}` has a total weight that is not finite")]
    TotalWeightOverflow(String),
}

impl RuleConfigurationError {
    pub(crate) fn invalid(kind: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// A single rule/text pair that could not be scored.
///
/// Never fatal: the rubric records it as a diagnostic and scores the rule 0.0.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Rule `{kind}` produced a non-finite score")]
    NonFinite { kind: String },

    #[error("Rule `{kind}` could not classify the text: {reason}")]
    Unclassifiable { kind: String, reason: String },
}

/// Trait implemented by every rule kind.
pub trait Rule: Send + Sync + fmt::Debug {
    /// The kind tag this rule was registered under.
    fn kind(&self) -> &str;

    /// Parameters in their generic form, used when persisting a rubric.
    ///
    /// Rebuilding the rule from `(kind(), params())` must yield a rule that
    /// scores every text identically.
    fn params(&self) -> ParamBag;

    /// Score `text`. Successful scores are expected in `[0.0, 1.0]`.
    ///
    /// Must be pure: same text, same score, no side effects.
    fn evaluate(&self, text: &str) -> Result<f64, ScoringError>;

    /// Score `text` with a human-readable account of the result.
    fn explain(&self, text: &str) -> RuleExplanation {
        match self.evaluate(text) {
            Ok(score) => RuleExplanation {
                kind: self.kind().to_string(),
                score,
                reasoning: format!("{} scored {:.2}", self.kind(), score),
                evidence: vec![],
                suggestions: vec![],
            },
            Err(e) => RuleExplanation {
                kind: self.kind().to_string(),
                score: 0.0,
                reasoning: e.to_string(),
                evidence: vec![],
                suggestions: vec![],
            },
        }
    }
}

/// Convert a parameter bag into a kind's typed parameter struct.
pub(crate) fn parse_params<T: DeserializeOwned>(
    kind: &str,
    params: &ParamBag,
) -> Result<T, RuleConfigurationError> {
    serde_json::from_value(serde_json::Value::Object(params.clone()))
        .map_err(|e| RuleConfigurationError::invalid(kind, e.to_string()))
}

/// Parameter struct for kinds that take no parameters.
#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct NoParams {}

/// Convert typed parameters back into their generic form.
pub(crate) fn to_params<T: Serialize>(params: &T) -> ParamBag {
    match serde_json::to_value(params) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => ParamBag::new(),
    }
}

/// Whitespace-delimited word count, shared by the length-sensitive kinds.
pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

lazy_static! {
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]+").unwrap();
}

/// Non-empty sentences, split on runs of terminal punctuation.
pub(crate) fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_END
        .split(text)
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

/// Lowercase alphabetic tokens.
pub(crate) fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphabetic() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
