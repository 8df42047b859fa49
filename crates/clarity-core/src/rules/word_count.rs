//! Word-count window.

use serde::{Deserialize, Serialize};

use super::{
    parse_params, to_params, word_count, ParamBag, Rule, RuleConfigurationError, ScoringError,
};

/// Parameters for [`WordCountRule`]. Both bounds are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WordCountParams {
    #[serde(default, alias = "min")]
    pub min_words: usize,

    /// Unbounded when absent
    #[serde(default, alias = "max", skip_serializing_if = "Option::is_none")]
    pub max_words: Option<usize>,
}

/// Scores 1.0 when the whitespace word count lies in `[min_words, max_words]`.
#[derive(Debug, Clone)]
pub struct WordCountRule {
    params: WordCountParams,
}

impl WordCountRule {
    pub const KIND: &'static str = "word_count";

    pub fn new(params: WordCountParams) -> Result<Self, RuleConfigurationError> {
        if let Some(max) = params.max_words {
            if params.min_words > max {
                return Err(RuleConfigurationError::invalid(
                    Self::KIND,
                    format!("min_words ({}) exceeds max_words ({})", params.min_words, max),
                ));
            }
        }

        Ok(Self { params })
    }

    pub fn range(min_words: usize, max_words: usize) -> Result<Self, RuleConfigurationError> {
        Self::new(WordCountParams {
            min_words,
            max_words: Some(max_words),
        })
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        Self::new(parse_params(Self::KIND, params)?)
    }

    fn in_range(&self, count: usize) -> bool {
        count >= self.params.min_words && self.params.max_words.map_or(true, |max| count <= max)
    }
}

impl Rule for WordCountRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        to_params(&self.params)
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        Ok(if self.in_range(word_count(text)) { 1.0 } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let rule = WordCountRule::range(5, 10).unwrap();

        assert_eq!(rule.evaluate(&words(4)).unwrap(), 0.0);
        assert_eq!(rule.evaluate(&words(5)).unwrap(), 1.0);
        assert_eq!(rule.evaluate(&words(10)).unwrap(), 1.0);
        assert_eq!(rule.evaluate(&words(11)).unwrap(), 0.0);
    }

    #[test]
    fn test_unbounded_max() {
        let rule = WordCountRule::new(WordCountParams {
            min_words: 2,
            max_words: None,
        })
        .unwrap();

        assert_eq!(rule.evaluate("one").unwrap(), 0.0);
        assert_eq!(rule.evaluate(&words(10_000)).unwrap(), 1.0);
    }

    #[test]
    fn test_min_greater_than_max_rejected() {
        assert!(matches!(
            WordCountRule::range(10, 5),
            Err(RuleConfigurationError::InvalidParams { .. })
        ));
    }

    #[test]
    fn test_short_aliases_accepted() {
        let mut bag = ParamBag::new();
        bag.insert("min".into(), 1.into());
        bag.insert("max".into(), 2.into());

        let rule = WordCountRule::from_params(&bag).unwrap();
        assert_eq!(rule.evaluate("two words").unwrap(), 1.0);
        assert!(rule.params().contains_key("min_words"));
    }
}
