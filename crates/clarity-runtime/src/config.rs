//! Configuration for a training run.
//!
//! Fixed when the orchestrator is built and snapshotted into the run state;
//! nothing here changes while a run is in flight.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clarity_core::{ConfigFileError, Normalization};

/// Training run configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Identifier handed to the model provider
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Rubric file used as the reward function
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,

    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Prompts per step
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Responses requested per prompt
    #[serde(default = "default_candidates")]
    pub candidates_per_prompt: usize,

    /// Root for the ledger and per-run directories
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Checkpoint every N steps; 0 disables intermediate checkpoints
    #[serde(default = "default_save_every")]
    pub save_every: u64,

    /// Per-step records kept in memory
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub normalization: Normalization,

    #[serde(default)]
    pub normalization_scope: NormalizationScope,

    #[serde(default)]
    pub prompts: PromptConfig,

    /// Backend-specific settings passed through to the optimizer
    /// (BTreeMap for deterministic iteration)
    #[serde(default = "default_optimizer_settings")]
    pub optimizer: BTreeMap<String, JsonValue>,
}

fn default_model_id() -> String {
    "microsoft/DialoGPT-small".to_string()
}

fn default_template_path() -> PathBuf {
    PathBuf::from("templates/demo.yaml")
}

fn default_max_steps() -> u64 {
    20
}

fn default_batch_size() -> usize {
    16
}

fn default_candidates() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("runs")
}

fn default_save_every() -> u64 {
    5
}

fn default_history_limit() -> usize {
    1000
}

fn default_optimizer_settings() -> BTreeMap<String, JsonValue> {
    let mut settings = BTreeMap::new();
    settings.insert("learning_rate".to_string(), JsonValue::from(1.41e-5));
    settings.insert("mini_batch_size".to_string(), JsonValue::from(4));
    settings.insert("ppo_epochs".to_string(), JsonValue::from(4));
    settings.insert("gradient_accumulation_steps".to_string(), JsonValue::from(1));
    settings.insert("cliprange".to_string(), JsonValue::from(0.2));
    settings.insert("cliprange_value".to_string(), JsonValue::from(0.2));
    settings.insert("vf_coef".to_string(), JsonValue::from(0.1));
    settings.insert("gamma".to_string(), JsonValue::from(1.0));
    settings.insert("lam".to_string(), JsonValue::from(0.95));
    settings
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            template_path: default_template_path(),
            max_steps: default_max_steps(),
            batch_size: default_batch_size(),
            candidates_per_prompt: default_candidates(),
            output_dir: default_output_dir(),
            save_every: default_save_every(),
            history_limit: default_history_limit(),
            sampling: SamplingConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            normalization: Normalization::None,
            normalization_scope: NormalizationScope::Batch,
            prompts: PromptConfig::default(),
            optimizer: default_optimizer_settings(),
        }
    }
}

impl RunConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let config: Self = serde_yaml::from_str(&read(path.as_ref())?)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let config: Self = serde_json::from_str(&read(path.as_ref())?)?;
        config.validate()?;
        Ok(config)
    }

    /// Load either format, picking by file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigFileError> {
        let fail = |msg: String| Err(ConfigFileError::Validation(msg));

        if self.model_id.trim().is_empty() {
            return fail("model_id must not be empty".into());
        }
        if self.max_steps == 0 {
            return fail("max_steps must be at least 1".into());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        if self.candidates_per_prompt == 0 {
            return fail("candidates_per_prompt must be at least 1".into());
        }
        if self.history_limit == 0 {
            return fail("history_limit must be at least 1".into());
        }
        if self.sampling.do_sample && !(self.sampling.temperature > 0.0) {
            return fail(format!(
                "sampling.temperature must be positive when sampling, got {}",
                self.sampling.temperature
            ));
        }
        if !(self.sampling.top_p > 0.0 && self.sampling.top_p <= 1.0) {
            return fail(format!(
                "sampling.top_p must be in (0, 1], got {}",
                self.sampling.top_p
            ));
        }
        if !(self.retry.multiplier >= 1.0) {
            return fail(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            ));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return fail("retry.initial_backoff must not exceed retry.max_backoff".into());
        }
        if self.normalization_scope == NormalizationScope::PerPrompt
            && self.normalization != Normalization::None
            && self.candidates_per_prompt < 2
        {
            return fail(format!(
                "normalization_scope per_prompt with {} normalization needs candidates_per_prompt >= 2, \
                 a single candidate always normalizes to a constant",
                self.normalization
            ));
        }
        if self.prompts.file.is_some() && !self.prompts.inline.is_empty() {
            return fail("prompts.inline and prompts.file are mutually exclusive".into());
        }
        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigFileError> {
    if !path.exists() {
        return Err(ConfigFileError::NotFound(path.to_path_buf()));
    }
    Ok(fs::read_to_string(path)?)
}

/// Generation parameters forwarded to the model provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingConfig {
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default = "default_top_p")]
    pub top_p: f64,

    #[serde(default = "default_true")]
    pub do_sample: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_max_new_tokens() -> u32 {
    50
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_k() -> u32 {
    50
}

fn default_top_p() -> f64 {
    0.95
}

fn default_true() -> bool {
    true
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            temperature: 0.7,
            top_k: 50,
            top_p: 0.95,
            do_sample: true,
            seed: None,
        }
    }
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(250)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Per-call deadlines for the external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    /// One `generate` call
    #[serde(with = "humantime_serde", default = "default_generation_timeout")]
    pub generation: Duration,

    /// One `submit_step` or `checkpoint` call
    #[serde(with = "humantime_serde", default = "default_optimizer_timeout")]
    pub optimizer: Duration,
}

fn default_generation_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_optimizer_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generation: Duration::from_secs(60),
            optimizer: Duration::from_secs(120),
        }
    }
}

/// Which scores are normalized together.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationScope {
    /// Every response in the step
    #[default]
    Batch,

    /// Candidates of the same prompt only
    PerPrompt,
}

/// How prompts are chosen each step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Round-robin through the list
    #[default]
    Cycle,

    /// Uniform draws from a seeded RNG
    Sample,
}

/// Prompt source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub mode: PromptMode,

    /// Seed for `sample` mode
    #[serde(default)]
    pub seed: u64,

    /// Inline prompt list; the built-in stems are used when empty and no file is set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline: Vec<String>,

    /// Text file with one prompt per non-empty line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// Custom serialization for Duration using humantime format
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
