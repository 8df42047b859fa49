//! External collaborators: the model provider and the optimizer backend.
//!
//! Both sit behind async traits so the orchestrator can be driven by a real
//! backend or by an in-process mock. Neither is called while a lock is held.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::config::SamplingConfig;

/// Failure reported by a model provider or optimizer backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Transient backend failure: {0}")]
    Transient(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend failure: {0}")]
    Fatal(String),
}

impl BackendError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout(_) | BackendError::Transient(_))
    }
}

/// Opaque handle to a loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHandle {
    /// Identifier the model was loaded from
    pub model_id: String,

    /// Provider-assigned token for the loaded instance
    pub token: String,
}

impl ModelHandle {
    pub fn new(model_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            token: token.into(),
        }
    }
}

/// Loads models and generates responses.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Get provider name.
    fn name(&self) -> &str;

    /// Instantiate the model behind `model_id`.
    async fn load(&self, model_id: &str) -> Result<ModelHandle, BackendError>;

    /// Check a freshly loaded handle is usable.
    async fn validate(&self, _handle: &ModelHandle) -> Result<(), BackendError> {
        Ok(())
    }

    /// Generate `count` responses to `prompt`.
    async fn generate(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        sampling: &SamplingConfig,
        count: usize,
    ) -> Result<Vec<String>, BackendError>;

    /// Release a handle. Called on every exit path after a successful load.
    async fn release(&self, _handle: &ModelHandle) {}
}

/// One (prompt, response, reward) tuple handed to the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSample {
    pub prompt: String,
    pub response: String,
    pub reward: f64,
}

/// All samples from one step, in prompt order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepBatch {
    /// 1-based step number
    pub step: u64,
    pub samples: Vec<StepSample>,
}

impl StepBatch {
    pub fn prompts(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.prompt.as_str())
    }

    pub fn responses(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.response.as_str())
    }

    pub fn rewards(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.reward)
    }
}

/// What the optimizer reports back for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,

    /// Backend-specific metrics (BTreeMap for deterministic iteration)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

/// Applies policy updates from rewarded samples.
#[async_trait]
pub trait Optimizer: Send + Sync {
    /// Get backend name.
    fn name(&self) -> &str;

    /// Wire the backend to the loaded model.
    async fn prepare(
        &self,
        handle: &ModelHandle,
        settings: &BTreeMap<String, JsonValue>,
    ) -> Result<(), BackendError>;

    /// Apply one policy update.
    async fn submit_step(&self, batch: &StepBatch) -> Result<StepResult, BackendError>;

    /// Persist model weights to `dir`.
    async fn checkpoint(&self, _dir: &Path, _step: u64) -> Result<(), BackendError> {
        Ok(())
    }
}
