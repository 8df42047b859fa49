//! # clarity-runtime
//!
//! Training loop around `clarity-core` scoring.
//!
//! The model and the policy-gradient update are external collaborators,
//! reached through [`ModelProvider`] and [`Optimizer`]. This crate owns
//! everything between them: prompts, generation with retry, scoring, reward
//! shaping, statistics, checkpoints and the run ledger.
//!
//! ## Example
//!
//! ```rust,ignore
//! use clarity_runtime::{Orchestrator, RunConfig};
//!
//! let config = RunConfig::from_yaml_file("run.yaml")?;
//! let mut orchestrator = Orchestrator::new(config, provider, optimizer)?;
//! let summary = orchestrator.train().await?;
//! println!("{} finished with average reward {:.3}", summary.run_id, summary.average_reward);
//! ```

pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod run;
pub mod stats;

pub use config::{
    NormalizationScope, PromptConfig, PromptMode, RetryConfig, RunConfig, SamplingConfig,
    TimeoutConfig,
};
pub use orchestrator::{CancelFlag, FailureCause, Orchestrator, RunError, RunSummary, Stage};
pub use prompts::{PromptSource, DEFAULT_PROMPTS};
pub use providers::{
    BackendError, ModelHandle, ModelProvider, Optimizer, StepBatch, StepResult, StepSample,
};
pub use resilience::{retry_with_backoff, Backoff};
pub use run::{
    append_to_ledger, load_ledger, run_id_at, RunPhase, RunRecord, RunState, RunStatus,
    StoreError,
};
pub use stats::{RewardStats, StepRecord, Welford};
