//! Positive-vocabulary detection.

use serde::{Deserialize, Serialize};

use super::{parse_params, to_params, ParamBag, Rule, RuleConfigurationError, ScoringError};

fn default_words() -> Vec<String> {
    ["good", "great", "excellent", "positive", "helpful", "clear"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_saturation() -> f64 {
    3.0
}

/// Parameters for [`SentimentRule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SentimentParams {
    /// Words counted as positive signals
    #[serde(default = "default_words")]
    pub words: Vec<String>,

    /// Number of distinct matches that earns a full score
    #[serde(default = "default_saturation")]
    pub saturation: f64,
}

impl Default for SentimentParams {
    fn default() -> Self {
        Self {
            words: default_words(),
            saturation: default_saturation(),
        }
    }
}

/// Scores `min(1, matches / saturation)` over a positive word list.
#[derive(Debug, Clone)]
pub struct SentimentRule {
    params: SentimentParams,
    lowered: Vec<String>,
}

impl SentimentRule {
    pub const KIND: &'static str = "sentiment_positive";

    pub fn new(params: SentimentParams) -> Result<Self, RuleConfigurationError> {
        if params.words.iter().all(|w| w.trim().is_empty()) {
            return Err(RuleConfigurationError::invalid(
                Self::KIND,
                "word list must not be empty",
            ));
        }
        if !(params.saturation.is_finite() && params.saturation > 0.0) {
            return Err(RuleConfigurationError::invalid(
                Self::KIND,
                format!("saturation must be positive, got {}", params.saturation),
            ));
        }

        let lowered = params
            .words
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        Ok(Self { params, lowered })
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        Self::new(parse_params(Self::KIND, params)?)
    }
}

impl Rule for SentimentRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        to_params(&self.params)
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        let text = text.to_lowercase();
        let matches = self.lowered.iter().filter(|w| text.contains(w.as_str())).count();
        Ok((matches as f64 / self.params.saturation).min(1.0))
    }
}
