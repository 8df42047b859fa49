//! Regular-expression match.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::{parse_params, to_params, ParamBag, Rule, RuleConfigurationError, ScoringError};

/// Parameters for [`RegexRule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RegexParams {
    pub pattern: String,

    #[serde(default)]
    pub case_insensitive: bool,
}

/// Scores 1.0 when the pattern matches anywhere in the text.
///
/// The pattern is compiled once, when the rule is built.
#[derive(Debug, Clone)]
pub struct RegexRule {
    params: RegexParams,
    regex: Regex,
}

impl RegexRule {
    pub const KIND: &'static str = "regex_match";

    pub fn new(params: RegexParams) -> Result<Self, RuleConfigurationError> {
        let regex = RegexBuilder::new(&params.pattern)
            .case_insensitive(params.case_insensitive)
            .build()
            .map_err(|source| RuleConfigurationError::InvalidPattern {
                kind: Self::KIND.to_string(),
                source,
            })?;

        Ok(Self { params, regex })
    }

    pub fn pattern(pattern: impl Into<String>) -> Result<Self, RuleConfigurationError> {
        Self::new(RegexParams {
            pattern: pattern.into(),
            case_insensitive: false,
        })
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        Self::new(parse_params(Self::KIND, params)?)
    }
}

impl Rule for RegexRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        to_params(&self.params)
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        Ok(if self.regex.is_match(text) { 1.0 } else { 0.0 })
    }
}
