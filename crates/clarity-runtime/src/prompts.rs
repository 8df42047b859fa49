//! Prompt sources for the training loop.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;

use clarity_core::ConfigFileError;

use crate::config::{PromptConfig, PromptMode};

/// Instruction stems used when no prompt list is configured.
pub const DEFAULT_PROMPTS: &[&str] = &[
    "Write a helpful explanation about",
    "Provide clear guidance on",
    "Give me advice about",
    "Explain in simple terms",
    "Help me understand",
    "What is the best way to",
    "Can you clarify",
    "Please describe how to",
];

/// Produces the prompt batch for each step.
///
/// Batches depend only on the step number, so a resumed run sees the same
/// prompts it would have seen without interruption.
#[derive(Debug, Clone)]
pub struct PromptSource {
    prompts: Vec<String>,
    mode: PromptMode,
    seed: u64,
}

impl PromptSource {
    pub fn new(prompts: Vec<String>, mode: PromptMode, seed: u64) -> Result<Self, ConfigFileError> {
        let prompts: Vec<String> = prompts
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if prompts.is_empty() {
            return Err(ConfigFileError::Validation(
                "prompt list must contain at least one prompt".into(),
            ));
        }
        Ok(Self { prompts, mode, seed })
    }

    /// The built-in stems, cycled.
    pub fn builtin() -> Self {
        Self {
            prompts: DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect(),
            mode: PromptMode::Cycle,
            seed: 0,
        }
    }

    /// Resolve a configured source: file, inline list, or the built-in stems.
    pub fn from_config(config: &PromptConfig) -> Result<Self, ConfigFileError> {
        let prompts = if let Some(path) = &config.file {
            if !path.exists() {
                return Err(ConfigFileError::NotFound(path.clone()));
            }
            fs::read_to_string(path)?.lines().map(String::from).collect()
        } else if !config.inline.is_empty() {
            config.inline.clone()
        } else {
            DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect()
        };
        Self::new(prompts, config.mode, config.seed)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Prompts for 1-based `step`.
    pub fn batch(&self, step: u64, size: usize) -> Vec<String> {
        let n = self.prompts.len();
        match self.mode {
            PromptMode::Cycle => {
                let offset = (step.saturating_sub(1) as usize).wrapping_mul(size);
                (0..size)
                    .map(|i| self.prompts[offset.wrapping_add(i) % n].clone())
                    .collect()
            }
            PromptMode::Sample => {
                let mut rng = StdRng::seed_from_u64(self.seed ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15));
                (0..size)
                    .map(|_| self.prompts[rng.random_range(0..n)].clone())
                    .collect()
            }
        }
    }
}
