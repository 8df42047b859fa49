//! # clarity-core
//!
//! Rubric-based reward scoring for text.
//!
//! A rubric is a named, weighted set of rules. Each rule scores a text in
//! `[0.0, 1.0]`; the rubric combines them into one weighted mean, the reward
//! fed to a training loop.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same rubric and text always produce the same score
//! 2. **Fail early**: Bad parameters are rejected when a rule is built
//! 3. **Never aborts a batch**: A rule that cannot score a text yields 0.0
//!    plus a diagnostic
//! 4. **Parallel-safe**: Rubrics are immutable once built and shared freely
//!
//! ## Example
//!
//! ```rust,ignore
//! use clarity_core::{Rubric, ScoringEngine, Normalization};
//!
//! let rubric = Rubric::from_file("templates/helpful.yaml")?;
//! let evaluation = rubric.evaluate("This is a helpful and detailed answer");
//! println!("{:.3}", evaluation.score);
//!
//! let engine = ScoringEngine::new(Normalization::ZScore);
//! let batch = engine.score_and_normalize(&rubric, &responses);
//! ```

pub mod engine;
pub mod rubric;
pub mod rules;
pub mod types;

// Re-export main types at crate root
pub use engine::{BatchScores, Normalization, RewardNormalizer, ScoringEngine};
pub use rubric::{ConfigFileError, Rubric, RuleEntry, TemplateDocument, WeightedRule};
pub use rules::{
    builtin, ParamBag, Rule, RuleConfigurationError, RuleRegistry, ScoringError,
};
pub use types::{
    Evaluation, ExplainedEvaluation, Feedback, RuleExplanation, RuleScore, ScoreBand,
};

use std::path::Path;

/// Score `text` against `rubric`.
pub fn score(text: &str, rubric: &Rubric) -> f64 {
    rubric.score(text)
}

/// Load the rubric at `path` and score `text` against it.
pub fn score_file(text: &str, path: impl AsRef<Path>) -> Result<f64, ConfigFileError> {
    let rubric = Rubric::from_file(path)?;
    Ok(rubric.score(text))
}
