//! Reward statistics for a training run.
//!
//! Totals are accumulated online, so memory stays flat however long the run
//! is. Only the most recent step records are kept.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Online mean/variance accumulator (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, values: I) {
        for value in values {
            self.push(value);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the values seen, or 0.0 when empty.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance, or 0.0 with fewer than two values.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Observability record for one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based step number
    pub step: u64,

    /// Mean raw aggregate score over the step's responses
    pub mean_reward: f64,

    /// Population variance of the raw aggregate scores
    pub reward_variance: f64,

    pub min_reward: f64,
    pub max_reward: f64,

    /// Responses scored this step
    pub samples: usize,

    /// Responses with at least one rule diagnostic
    pub diagnostics: usize,

    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
}

impl StepRecord {
    /// Summarize one step's raw scores.
    pub fn from_scores(step: u64, scores: &[f64], diagnostics: usize, duration_ms: u64) -> Self {
        let mut acc = Welford::new();
        acc.extend(scores.iter().copied());
        let min_reward = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max_reward = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            step,
            mean_reward: acc.mean(),
            reward_variance: acc.variance(),
            min_reward: if scores.is_empty() { 0.0 } else { min_reward },
            max_reward: if scores.is_empty() { 0.0 } else { max_reward },
            samples: scores.len(),
            diagnostics,
            duration_ms,
            loss: None,
        }
    }
}

/// Run-level reward statistics with a bounded step history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardStats {
    /// Over every scored response in the run
    pub rewards: Welford,

    /// Over the per-step mean rewards
    pub step_means: Welford,

    /// Most recent step records, oldest first
    pub history: VecDeque<StepRecord>,

    pub history_limit: usize,
}

impl RewardStats {
    pub fn new(history_limit: usize) -> Self {
        Self {
            rewards: Welford::new(),
            step_means: Welford::new(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Fold a completed step in, evicting the oldest record past the limit.
    pub fn record(&mut self, scores: &[f64], record: StepRecord) {
        self.rewards.extend(scores.iter().copied());
        self.step_means.push(record.mean_reward);

        self.history.push_back(record);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Mean of the per-step mean rewards.
    pub fn average_reward(&self) -> f64 {
        self.step_means.mean()
    }

    /// Mean reward of the latest step.
    pub fn final_reward(&self) -> f64 {
        self.history.back().map_or(0.0, |r| r.mean_reward)
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.history.back()
    }
}
