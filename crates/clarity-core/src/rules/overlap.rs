//! Word overlap with a target text.
//!
//! Kept under the `cosine_sim` kind tag for template compatibility; the score
//! is the fraction of distinct target words that also appear in the text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{parse_params, to_params, ParamBag, Rule, RuleConfigurationError, ScoringError};

/// Parameters for [`WordOverlapRule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OverlapParams {
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct WordOverlapRule {
    params: OverlapParams,
    target_words: BTreeSet<String>,
}

fn distinct_words(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect()
}

impl WordOverlapRule {
    pub const KIND: &'static str = "cosine_sim";

    pub fn new(params: OverlapParams) -> Result<Self, RuleConfigurationError> {
        let target_words = distinct_words(&params.target);
        if target_words.is_empty() {
            return Err(RuleConfigurationError::invalid(
                Self::KIND,
                "target must contain at least one word",
            ));
        }

        Ok(Self {
            params,
            target_words,
        })
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        Self::new(parse_params(Self::KIND, params)?)
    }
}

impl Rule for WordOverlapRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        to_params(&self.params)
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        let words = distinct_words(text);
        let overlap = self.target_words.intersection(&words).count();
        Ok((overlap as f64 / self.target_words.len() as f64).min(1.0))
    }
}
