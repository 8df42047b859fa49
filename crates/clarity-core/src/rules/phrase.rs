//! Phrase containment.

use serde::{Deserialize, Serialize};

use super::{parse_params, to_params, ParamBag, Rule, RuleConfigurationError, ScoringError};

fn default_true() -> bool {
    true
}

/// Parameters for [`PhraseRule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PhraseParams {
    /// The phrase that must occur literally in the text
    pub phrase: String,

    /// Match case exactly (default)
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

/// Scores 1.0 when the phrase occurs in the text, else 0.0.
#[derive(Debug, Clone)]
pub struct PhraseRule {
    params: PhraseParams,
    needle: String,
}

impl PhraseRule {
    pub const KIND: &'static str = "contains_phrase";

    pub fn new(params: PhraseParams) -> Result<Self, RuleConfigurationError> {
        if params.phrase.is_empty() {
            return Err(RuleConfigurationError::invalid(
                Self::KIND,
                "phrase must not be empty",
            ));
        }

        let needle = if params.case_sensitive {
            params.phrase.clone()
        } else {
            params.phrase.to_lowercase()
        };

        Ok(Self { params, needle })
    }

    /// Case-sensitive phrase rule.
    pub fn phrase(phrase: impl Into<String>) -> Result<Self, RuleConfigurationError> {
        Self::new(PhraseParams {
            phrase: phrase.into(),
            case_sensitive: true,
        })
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        Self::new(parse_params(Self::KIND, params)?)
    }
}

impl Rule for PhraseRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        to_params(&self.params)
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        let found = if self.params.case_sensitive {
            text.contains(&self.needle)
        } else {
            text.to_lowercase().contains(&self.needle)
        };

        Ok(if found { 1.0 } else { 0.0 })
    }
}
