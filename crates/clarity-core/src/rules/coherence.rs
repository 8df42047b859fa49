//! Lexical coherence between neighbouring sentences.
//!
//! Each sentence becomes a bag of content words; the score is twice the mean
//! cosine similarity of adjacent bags, capped at 1.0.

use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashSet};

use super::{parse_params, sentences, words, NoParams, ParamBag, Rule, RuleConfigurationError, ScoringError};
use crate::types::RuleExplanation;

const SINGLE_SENTENCE_SCORE: f64 = 0.8;
const HIGH_THRESHOLD: f64 = 0.7;
const MEDIUM_THRESHOLD: f64 = 0.4;

lazy_static! {
    static ref STOPWORDS: HashSet<&'static str> = [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "i",
        "in", "is", "it", "its", "of", "on", "or", "that", "the", "their", "they", "this",
        "to", "was", "we", "were", "with", "you",
    ]
    .into_iter()
    .collect();
}

type Bag = BTreeMap<String, f64>;

fn bag(sentence: &str) -> Bag {
    let mut bag = Bag::new();
    for word in words(sentence) {
        if !STOPWORDS.contains(word.as_str()) {
            *bag.entry(word).or_insert(0.0) += 1.0;
        }
    }
    bag
}

fn cosine(a: &Bag, b: &Bag) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(word, x)| b.get(word).map(|y| x * y))
        .sum();
    let norm = |bag: &Bag| bag.values().map(|v| v * v).sum::<f64>().sqrt();
    let denominator = norm(a) * norm(b);
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

/// Adjacent-sentence similarities, or `None` for fewer than two sentences.
fn similarities(text: &str) -> Option<Vec<f64>> {
    let bags: Vec<Bag> = sentences(text).into_iter().map(bag).collect();
    if bags.len() < 2 {
        return None;
    }
    Some(bags.windows(2).map(|pair| cosine(&pair[0], &pair[1])).collect())
}

fn score_similarities(similarities: &[f64]) -> f64 {
    let mean = similarities.iter().sum::<f64>() / similarities.len() as f64;
    (mean * 2.0).clamp(0.0, 1.0)
}

/// Rewards text whose consecutive sentences share vocabulary.
#[derive(Debug, Clone, Default)]
pub struct CoherenceRule;

impl CoherenceRule {
    pub const KIND: &'static str = "semantic_coherence";

    pub fn new() -> Self {
        Self
    }

    pub fn from_params(params: &ParamBag) -> Result<Self, RuleConfigurationError> {
        let _: NoParams = parse_params(Self::KIND, params)?;
        Ok(Self)
    }
}

impl Rule for CoherenceRule {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn params(&self) -> ParamBag {
        ParamBag::new()
    }

    fn evaluate(&self, text: &str) -> Result<f64, ScoringError> {
        Ok(match similarities(text) {
            Some(sims) => score_similarities(&sims),
            None => SINGLE_SENTENCE_SCORE,
        })
    }

    fn explain(&self, text: &str) -> RuleExplanation {
        let Some(sims) = similarities(text) else {
            return RuleExplanation {
                kind: Self::KIND.to_string(),
                score: SINGLE_SENTENCE_SCORE,
                reasoning: "Single sentence, coherence not applicable".to_string(),
                evidence: vec![],
                suggestions: vec![],
            };
        };

        let score = score_similarities(&sims);
        let mean = sims.iter().sum::<f64>() / sims.len() as f64;
        let low = sims.iter().copied().fold(f64::INFINITY, f64::min);
        let high = sims.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let evidence = vec![
            format!("Mean neighbouring-sentence similarity: {mean:.3}"),
            format!("Sentences analyzed: {}", sims.len() + 1),
            format!("Similarity range: {low:.3} - {high:.3}"),
        ];

        let (reasoning, suggestions) = if score >= HIGH_THRESHOLD {
            ("Sentences build on each other", vec![])
        } else if score >= MEDIUM_THRESHOLD {
            (
                "Moderate coherence with some topic drift",
                vec![
                    "Use consistent terminology".to_string(),
                    "Add transitions between sentences".to_string(),
                ],
            )
        } else {
            (
                "Sentences seem disconnected",
                vec![
                    "Focus on a single main topic".to_string(),
                    "Remove off-topic content".to_string(),
                ],
            )
        };

        RuleExplanation {
            kind: Self::KIND.to_string(),
            score,
            reasoning: reasoning.to_string(),
            evidence,
            suggestions,
        }
    }
}
