//! Scoring engine: one rubric, many texts.
//!
//! Texts are scored independently and in parallel; results always come back
//! in input order. Reward shaping across a batch is a separate, pluggable
//! step applied to the raw aggregate scores.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rubric::Rubric;
use crate::types::Evaluation;

/// A pure function over a batch of raw aggregate scores.
///
/// Implementations must return one value per input, in input order.
pub trait RewardNormalizer: Send + Sync + fmt::Debug {
    fn normalize(&self, scores: &[f64]) -> Vec<f64>;
}

/// Built-in reward normalization policies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Raw aggregate scores pass through unchanged
    #[default]
    None,

    /// `(x - mean) / stddev`, population stddev; all zeros when stddev is 0
    ZScore,

    /// `(x - min) / (max - min)`; all 0.5 when every score is equal
    MinMax,

    /// Average rank scaled to `[0, 1]`; ties share a rank
    Rank,
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Normalization::None => "none",
            Normalization::ZScore => "z_score",
            Normalization::MinMax => "min_max",
            Normalization::Rank => "rank",
        };
        write!(f, "{name}")
    }
}

impl RewardNormalizer for Normalization {
    fn normalize(&self, scores: &[f64]) -> Vec<f64> {
        if scores.is_empty() {
            return Vec::new();
        }
        match self {
            Normalization::None => scores.to_vec(),
            Normalization::ZScore => z_score(scores),
            Normalization::MinMax => min_max(scores),
            Normalization::Rank => rank(scores),
        }
    }
}

fn z_score(scores: &[f64]) -> Vec<f64> {
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    if stddev <= f64::EPSILON {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|x| (x - mean) / stddev).collect()
}

fn min_max(scores: &[f64]) -> Vec<f64> {
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if range <= f64::EPSILON {
        return vec![0.5; scores.len()];
    }
    scores.iter().map(|x| (x - min) / range).collect()
}

fn rank(scores: &[f64]) -> Vec<f64> {
    let n = scores.len();
    if n == 1 {
        return vec![0.5];
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Tied run occupies positions start..end; share the average position.
        let average = (start + end - 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = average / (n - 1) as f64;
        }
        start = end;
    }
    ranks
}

/// Scores from one batch: per-text evaluations plus shaped rewards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchScores {
    /// One evaluation per input text, in input order
    pub evaluations: Vec<Evaluation>,

    /// Normalized rewards, aligned with `evaluations`
    pub rewards: Vec<f64>,
}

impl BatchScores {
    pub fn raw_scores(&self) -> Vec<f64> {
        self.evaluations.iter().map(|e| e.score).collect()
    }

    pub fn len(&self) -> usize {
        self.evaluations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluations.is_empty()
    }
}

/// Applies a rubric to batches of texts.
#[derive(Debug)]
pub struct ScoringEngine {
    normalizer: Box<dyn RewardNormalizer>,
    parallel: bool,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(Normalization::None)
    }
}

impl ScoringEngine {
    pub fn new(normalizer: impl RewardNormalizer + 'static) -> Self {
        Self {
            normalizer: Box::new(normalizer),
            parallel: true,
        }
    }

    /// Score on the calling thread only.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Evaluate every text against `rubric`, preserving input order.
    pub fn score_batch<S>(&self, rubric: &Rubric, texts: &[S]) -> Vec<Evaluation>
    where
        S: AsRef<str> + Sync,
    {
        if self.parallel {
            texts.par_iter().map(|t| rubric.evaluate(t.as_ref())).collect()
        } else {
            texts.iter().map(|t| rubric.evaluate(t.as_ref())).collect()
        }
    }

    /// Apply the configured normalization to raw aggregate scores.
    pub fn normalize(&self, scores: &[f64]) -> Vec<f64> {
        self.normalizer.normalize(scores)
    }

    /// Evaluate a batch and shape its rewards in one call.
    pub fn score_and_normalize<S>(&self, rubric: &Rubric, texts: &[S]) -> BatchScores
    where
        S: AsRef<str> + Sync,
    {
        let evaluations = self.score_batch(rubric, texts);
        let raw: Vec<f64> = evaluations.iter().map(|e| e.score).collect();
        let rewards = self.normalize(&raw);

        let diagnostics = evaluations.iter().filter(|e| e.has_diagnostics()).count();
        if diagnostics > 0 {
            tracing::warn!(
                rubric = %rubric.name,
                texts = texts.len(),
                diagnostics,
                "Some texts scored with rule diagnostics"
            );
        }

        BatchScores {
            evaluations,
            rewards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{PhraseRule, WordCountRule};

    fn rubric() -> Rubric {
        let mut rubric = Rubric::new("engine");
        rubric.push_rule(PhraseRule::phrase("helpful").unwrap(), 2.0).unwrap();
        rubric.push_rule(WordCountRule::range(3, 10).unwrap(), 1.0).unwrap();
        rubric
    }

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_batch_preserves_order() {
        let texts: Vec<String> = (0..200)
            .map(|i| {
                if i % 3 == 0 {
                    format!("a helpful reply number {i}")
                } else {
                    "nope".to_string()
                }
            })
            .collect();

        let engine = ScoringEngine::default();
        let parallel = engine.score_batch(&rubric(), &texts);
        let sequential = ScoringEngine::default().sequential().score_batch(&rubric(), &texts);

        assert_eq!(parallel, sequential);
        for (i, evaluation) in parallel.iter().enumerate() {
            let expected = if i % 3 == 0 { 1.0 } else { 0.0 };
            assert_eq!(evaluation.score, expected, "text {i}");
        }
    }

    #[test]
    fn test_empty_batch() {
        let engine = ScoringEngine::new(Normalization::ZScore);
        let texts: [&str; 0] = [];
        let scores = engine.score_and_normalize(&rubric(), &texts);
        assert!(scores.is_empty());
        assert!(scores.rewards.is_empty());
    }

    #[test]
    fn test_none_passthrough() {
        let scores = [0.1, 0.7, 0.3];
        assert_eq!(Normalization::None.normalize(&scores), scores.to_vec());
    }

    #[test]
    fn test_z_score() {
        let out = Normalization::ZScore.normalize(&[1.0, 2.0, 3.0]);
        let s = (2.0_f64 / 3.0).sqrt();
        assert!(close(&out, &[-1.0 / s, 0.0, 1.0 / s]));

        assert_eq!(Normalization::ZScore.normalize(&[0.4, 0.4]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_min_max() {
        let out = Normalization::MinMax.normalize(&[0.2, 0.6, 1.0]);
        assert!(close(&out, &[0.0, 0.5, 1.0]));

        assert_eq!(Normalization::MinMax.normalize(&[0.3, 0.3, 0.3]), vec![0.5; 3]);
    }

    #[test]
    fn test_rank_with_ties() {
        let out = Normalization::Rank.normalize(&[0.9, 0.1, 0.5, 0.5]);
        assert!(close(&out, &[1.0, 0.0, 0.5, 0.5]));

        assert_eq!(Normalization::Rank.normalize(&[0.7]), vec![0.5]);
    }

    #[test]
    fn test_normalizer_is_pluggable() {
        #[derive(Debug)]
        struct Centered;

        impl RewardNormalizer for Centered {
            fn normalize(&self, scores: &[f64]) -> Vec<f64> {
                scores.iter().map(|s| s - 0.5).collect()
            }
        }

        let engine = ScoringEngine::new(Centered);
        let scores = engine.score_and_normalize(&rubric(), &["a helpful reply here", "no"]);
        assert_eq!(scores.raw_scores(), vec![1.0, 0.0]);
        assert_eq!(scores.rewards, vec![0.5, -0.5]);
    }

    #[test]
    fn test_normalization_serde_names() {
        let parsed: Normalization = serde_json::from_str("\"z_score\"").unwrap();
        assert_eq!(parsed, Normalization::ZScore);
        assert_eq!(Normalization::MinMax.to_string(), "min_max");
    }
}
