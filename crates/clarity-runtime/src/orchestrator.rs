//! Training orchestrator.
//!
//! Drives a run through its lifecycle:
//! `Uninitialized → TemplateLoaded → ModelLoaded → TrainerReady → Running →
//! (Completed | Failed)`.
//!
//! Each step:
//! 1. Build the prompt batch
//! 2. Generate responses, one prompt at a time, in prompt order
//! 3. Score every response against the rubric on the blocking pool
//! 4. Shape rewards and submit (prompt, response, reward) tuples
//! 5. Record statistics and write the run state
//!
//! The control flow is a single task. Only scoring fans out, and it reads
//! nothing but the immutable rubric and the response texts.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;

use clarity_core::{ConfigFileError, Rubric, ScoringEngine};

use crate::config::{NormalizationScope, RunConfig};
use crate::prompts::PromptSource;
use crate::providers::{
    BackendError, ModelHandle, ModelProvider, Optimizer, StepBatch, StepSample,
};
use crate::resilience::retry_with_backoff;
use crate::run::{append_to_ledger, run_id_at, RunPhase, RunState, RunStatus, StoreError};
use crate::stats::StepRecord;

/// Where in a run a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configuration,
    TemplateLoad,
    ModelLoad,
    TrainerSetup,
    Generation,
    Scoring,
    Optimization,
    Checkpoint,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::TemplateLoad => "template load",
            Stage::ModelLoad => "model load",
            Stage::TrainerSetup => "trainer setup",
            Stage::Generation => "generation",
            Stage::Scoring => "scoring",
            Stage::Optimization => "optimization",
            Stage::Checkpoint => "checkpoint",
        };
        write!(f, "{name}")
    }
}

/// Underlying cause of a run failure.
#[derive(Error, Debug)]
pub enum FailureCause {
    #[error(transparent)]
    Config(#[from] ConfigFileError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Scoring task failed: {0}")]
    ScoringTask(String),

    #[error("Cannot {action} while {phase}")]
    InvalidPhase { action: &'static str, phase: RunPhase },
}

/// A run failure with the stage and step it happened at.
#[derive(Error, Debug)]
#[error("{stage} failed{}: {source}", step_suffix(.step))]
pub struct RunError {
    pub stage: Stage,

    /// 1-based step, when the failure happened inside the loop
    pub step: Option<u64>,

    pub source: FailureCause,
}

fn step_suffix(step: &Option<u64>) -> String {
    step.map(|s| format!(" at step {s}")).unwrap_or_default()
}

impl RunError {
    pub fn new(stage: Stage, step: Option<u64>, source: impl Into<FailureCause>) -> Self {
        Self {
            stage,
            step,
            source: source.into(),
        }
    }
}

/// Cooperative cancellation, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub total_steps: u64,
    pub average_reward: f64,
    pub final_reward: f64,
    pub run_dir: PathBuf,
}

impl From<&RunState> for RunSummary {
    fn from(state: &RunState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            total_steps: state.step,
            average_reward: state.stats.average_reward(),
            final_reward: state.stats.final_reward(),
            run_dir: state.run_dir(),
        }
    }
}

struct StepOutcome {
    raw: Vec<f64>,
    record: StepRecord,
}

/// The training orchestrator.
pub struct Orchestrator {
    config: RunConfig,
    provider: Arc<dyn ModelProvider>,
    optimizer: Arc<dyn Optimizer>,
    engine: Arc<ScoringEngine>,
    phase: RunPhase,
    rubric: Option<Arc<Rubric>>,
    prompts: Option<PromptSource>,
    handle: Option<ModelHandle>,
    state: Option<RunState>,
    cancel: CancelFlag,
}

impl Orchestrator {
    /// Create an orchestrator for a validated configuration. Nothing is
    /// loaded until the stages run.
    pub fn new(
        config: RunConfig,
        provider: Arc<dyn ModelProvider>,
        optimizer: Arc<dyn Optimizer>,
    ) -> Result<Self, RunError> {
        config
            .validate()
            .map_err(|e| RunError::new(Stage::Configuration, None, e))?;
        let engine = Arc::new(ScoringEngine::new(config.normalization));
        Ok(Self {
            config,
            provider,
            optimizer,
            engine,
            phase: RunPhase::Uninitialized,
            rubric: None,
            prompts: None,
            handle: None,
            state: None,
            cancel: CancelFlag::new(),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Run state of the current or last run.
    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    pub fn rubric(&self) -> Option<&Rubric> {
        self.rubric.as_deref()
    }

    /// A handle that stops the run before its next step.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Continue a saved run instead of starting a new one.
    ///
    /// The saved configuration snapshot replaces the orchestrator's own, so
    /// the resumed run trains against the same template, model and limits.
    /// The model is loaded from the run's last checkpoint when it has one.
    pub fn resume_from(&mut self, state: RunState) -> Result<(), RunError> {
        self.expect_phase(RunPhase::Uninitialized, "resume a run", Stage::Configuration)?;
        state
            .config
            .validate()
            .map_err(|e| RunError::new(Stage::Configuration, None, e))?;
        tracing::info!(
            run_id = %state.run_id,
            step = state.step,
            checkpoint = ?state.last_checkpoint,
            "Resuming training run"
        );

        self.config = state.config.clone();
        self.engine = Arc::new(ScoringEngine::new(self.config.normalization));
        self.state = Some(state);
        Ok(())
    }

    /// Load and validate the rubric named by `template_path`, and the prompt source.
    pub fn load_template(&mut self) -> Result<(), RunError> {
        self.expect_phase(RunPhase::Uninitialized, "load a template", Stage::TemplateLoad)?;
        let rubric = Rubric::from_file(&self.config.template_path);
        self.install_template(rubric)
    }

    /// Use an already-built rubric instead of loading one.
    pub fn use_rubric(&mut self, rubric: Rubric) -> Result<(), RunError> {
        self.expect_phase(RunPhase::Uninitialized, "load a template", Stage::TemplateLoad)?;
        let validated = rubric
            .validate()
            .map(|_| rubric)
            .map_err(ConfigFileError::from);
        self.install_template(validated)
    }

    fn install_template(&mut self, rubric: Result<Rubric, ConfigFileError>) -> Result<(), RunError> {
        let loaded = rubric.and_then(|r| Ok((r, PromptSource::from_config(&self.config.prompts)?)));
        match loaded {
            Ok((rubric, prompts)) => {
                tracing::info!(
                    template = %rubric.name,
                    rules = rubric.len(),
                    prompts = prompts.len(),
                    "Template loaded"
                );
                self.rubric = Some(Arc::new(rubric));
                self.prompts = Some(prompts);
                self.phase = RunPhase::TemplateLoaded;
                Ok(())
            }
            Err(e) => Err(self.fail(Stage::TemplateLoad, None, e)),
        }
    }

    /// Where the model weights come from: the resumed run's last checkpoint,
    /// or `model_id` for a fresh run.
    pub fn model_source(&self) -> String {
        self.state
            .as_ref()
            .and_then(|state| state.last_checkpoint.as_ref())
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| self.config.model_id.clone())
    }

    /// Load and validate the model.
    ///
    /// A handle that fails validation is released before the error surfaces.
    pub async fn load_model(&mut self) -> Result<(), RunError> {
        self.expect_phase(RunPhase::TemplateLoaded, "load a model", Stage::ModelLoad)?;

        let source = self.model_source();
        let handle = match self.provider.load(&source).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(Stage::ModelLoad, None, e)),
        };
        if let Err(e) = self.provider.validate(&handle).await {
            self.provider.release(&handle).await;
            return Err(self.fail(Stage::ModelLoad, None, e));
        }

        tracing::info!(
            provider = self.provider.name(),
            model = %handle.model_id,
            "Model loaded"
        );
        self.handle = Some(handle);
        self.phase = RunPhase::ModelLoaded;
        Ok(())
    }

    /// Wire the optimizer to the loaded model.
    pub async fn setup_trainer(&mut self) -> Result<(), RunError> {
        self.expect_phase(RunPhase::ModelLoaded, "set up the trainer", Stage::TrainerSetup)?;

        let prepared = match &self.handle {
            Some(handle) => self.optimizer.prepare(handle, &self.config.optimizer).await,
            None => Err(BackendError::Fatal("no model handle".into())),
        };
        if let Err(e) = prepared {
            self.release_model().await;
            return Err(self.fail(Stage::TrainerSetup, None, e));
        }

        tracing::info!(optimizer = self.optimizer.name(), "Trainer ready");
        self.phase = RunPhase::TrainerReady;
        Ok(())
    }

    /// Run every stage, then the step loop.
    pub async fn train(&mut self) -> Result<RunSummary, RunError> {
        self.load_template()?;
        self.load_model().await?;
        self.setup_trainer().await?;
        self.run().await
    }

    /// Run the step loop until `max_steps`, cancellation, or a fatal error.
    ///
    /// Whatever the outcome, the run state is written, the run is appended
    /// to the ledger, and the model handle is released.
    pub async fn run(&mut self) -> Result<RunSummary, RunError> {
        self.expect_phase(RunPhase::TrainerReady, "start the run", Stage::Generation)?;

        let loaded = match (&self.rubric, &self.prompts, &self.handle) {
            (Some(r), Some(p), Some(h)) => Some((Arc::clone(r), p.clone(), h.clone())),
            _ => None,
        };
        let Some((rubric, prompts, handle)) = loaded else {
            let cause = FailureCause::InvalidPhase {
                action: "start the run",
                phase: self.phase,
            };
            return Err(self.fail(Stage::Generation, None, cause));
        };

        let mut state = match self.state.take() {
            Some(state) => state,
            None => {
                let now = Utc::now();
                RunState::new(run_id_at(now), self.config.clone(), now)
            }
        };
        state.status = RunStatus::Running;
        state.error = None;
        self.phase = RunPhase::Running;

        tracing::info!(
            run_id = %state.run_id,
            first_step = state.step + 1,
            max_steps = self.config.max_steps,
            "Starting training run"
        );

        let outcome = self.drive(&mut state, &handle, &rubric, &prompts).await;
        let result = self.finish(&mut state, outcome);
        self.release_model().await;

        self.phase = if result.is_ok() {
            RunPhase::Completed
        } else {
            RunPhase::Failed
        };
        let summary = RunSummary::from(&state);
        self.state = Some(state);

        result.map(|_| summary)
    }

    /// Release the model without running. A no-op when nothing is loaded.
    pub async fn shutdown(&mut self) {
        self.release_model().await;
    }

    async fn drive(
        &self,
        state: &mut RunState,
        handle: &ModelHandle,
        rubric: &Arc<Rubric>,
        prompts: &PromptSource,
    ) -> Result<RunStatus, RunError> {
        while state.step < self.config.max_steps {
            if self.cancel.is_cancelled() {
                tracing::warn!(run_id = %state.run_id, step = state.step, "Run cancelled");
                return Ok(RunStatus::Cancelled);
            }

            let step = state.step + 1;
            let outcome = self.run_step(step, handle, rubric, prompts).await?;

            tracing::info!(
                step,
                max_steps = self.config.max_steps,
                mean_reward = outcome.record.mean_reward,
                reward_variance = outcome.record.reward_variance,
                duration_ms = outcome.record.duration_ms,
                "Step complete"
            );
            state.stats.record(&outcome.raw, outcome.record);
            state.step = step;
            state.updated_at = Utc::now();

            if self.config.save_every > 0 && step % self.config.save_every == 0 {
                let dir = state.run_dir().join(format!("checkpoint-{step}"));
                self.checkpoint(&dir, step).await?;
                state.last_checkpoint = Some(dir);
            }

            state
                .save()
                .map_err(|e| RunError::new(Stage::Checkpoint, Some(step), e))?;
        }

        let final_dir = state.run_dir().join("final");
        self.checkpoint(&final_dir, state.step).await?;
        state.last_checkpoint = Some(final_dir);
        Ok(RunStatus::Completed)
    }

    async fn run_step(
        &self,
        step: u64,
        handle: &ModelHandle,
        rubric: &Arc<Rubric>,
        prompts: &PromptSource,
    ) -> Result<StepOutcome, RunError> {
        let started = Instant::now();
        let batch_prompts = prompts.batch(step, self.config.batch_size);

        let mut sample_prompts = Vec::new();
        let mut responses = Vec::new();
        let mut groups = Vec::with_capacity(batch_prompts.len());
        for prompt in &batch_prompts {
            let generated = retry_with_backoff(
                &self.config.retry,
                self.config.timeouts.generation,
                "generate",
                || {
                    self.provider.generate(
                        handle,
                        prompt,
                        &self.config.sampling,
                        self.config.candidates_per_prompt,
                    )
                },
            )
            .await
            .map_err(|e| RunError::new(Stage::Generation, Some(step), e))?;

            groups.push(generated.len());
            sample_prompts.extend(std::iter::repeat(prompt.clone()).take(generated.len()));
            responses.extend(generated);
        }

        let engine = Arc::clone(&self.engine);
        let scoring_rubric = Arc::clone(rubric);
        let (responses, evaluations) = tokio::task::spawn_blocking(move || {
            let evaluations = engine.score_batch(&scoring_rubric, &responses);
            (responses, evaluations)
        })
        .await
        .map_err(|e| {
            RunError::new(Stage::Scoring, Some(step), FailureCause::ScoringTask(e.to_string()))
        })?;

        let raw: Vec<f64> = evaluations.iter().map(|e| e.score).collect();
        let diagnostics = evaluations.iter().filter(|e| e.has_diagnostics()).count();
        if diagnostics > 0 {
            tracing::warn!(step, diagnostics, "Responses scored with rule diagnostics");
        }
        let rewards = self.shape_rewards(&raw, &groups);

        let batch = StepBatch {
            step,
            samples: sample_prompts
                .into_iter()
                .zip(responses)
                .zip(rewards)
                .map(|((prompt, response), reward)| StepSample {
                    prompt,
                    response,
                    reward,
                })
                .collect(),
        };

        let result = retry_with_backoff(
            &self.config.retry,
            self.config.timeouts.optimizer,
            "submit_step",
            || self.optimizer.submit_step(&batch),
        )
        .await
        .map_err(|e| RunError::new(Stage::Optimization, Some(step), e))?;

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut record = StepRecord::from_scores(step, &raw, diagnostics, elapsed);
        record.loss = result.loss;

        Ok(StepOutcome { raw, record })
    }

    /// Normalize raw scores over the whole step or per prompt group.
    fn shape_rewards(&self, raw: &[f64], groups: &[usize]) -> Vec<f64> {
        match self.config.normalization_scope {
            NormalizationScope::Batch => self.engine.normalize(raw),
            NormalizationScope::PerPrompt => {
                let mut rewards = Vec::with_capacity(raw.len());
                let mut start = 0;
                for &len in groups {
                    rewards.extend(self.engine.normalize(&raw[start..start + len]));
                    start += len;
                }
                rewards
            }
        }
    }

    async fn checkpoint(&self, dir: &Path, step: u64) -> Result<(), RunError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RunError::new(Stage::Checkpoint, Some(step), StoreError::from(e)))?;

        retry_with_backoff(
            &self.config.retry,
            self.config.timeouts.optimizer,
            "checkpoint",
            || self.optimizer.checkpoint(dir, step),
        )
        .await
        .map_err(|e| RunError::new(Stage::Checkpoint, Some(step), e))?;

        tracing::info!(step, dir = %dir.display(), "Saved checkpoint");
        Ok(())
    }

    /// Record the outcome on the state and persist it with a ledger entry.
    fn finish(
        &self,
        state: &mut RunState,
        outcome: Result<RunStatus, RunError>,
    ) -> Result<(), RunError> {
        let ended = Utc::now();
        state.updated_at = ended;
        match &outcome {
            Ok(status) => state.status = *status,
            Err(e) => {
                tracing::error!(run_id = %state.run_id, error = %e, "Training run failed");
                state.status = RunStatus::Failed;
                state.error = Some(e.to_string());
            }
        }

        let persisted = state.save().and_then(|_| {
            append_to_ledger(&self.config.output_dir, state.to_record(Some(ended)))
        });

        match (outcome, persisted) {
            (Ok(status), Ok(ledger)) => {
                tracing::info!(
                    run_id = %state.run_id,
                    %status,
                    steps = state.step,
                    average_reward = state.stats.average_reward(),
                    ledger = %ledger.display(),
                    "Training run finished"
                );
                Ok(())
            }
            (Ok(_), Err(e)) => Err(RunError::new(Stage::Checkpoint, Some(state.step), e)),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(store)) => {
                tracing::error!(error = %store, "Failed to persist failed run");
                Err(e)
            }
        }
    }

    async fn release_model(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.provider.release(&handle).await;
            tracing::debug!(model = %handle.model_id, "Model released");
        }
    }

    fn expect_phase(&self, expected: RunPhase, action: &'static str, stage: Stage) -> Result<(), RunError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(RunError::new(
                stage,
                None,
                FailureCause::InvalidPhase {
                    action,
                    phase: self.phase,
                },
            ))
        }
    }

    fn fail(&mut self, stage: Stage, step: Option<u64>, cause: impl Into<FailureCause>) -> RunError {
        let error = RunError::new(stage, step, cause);
        tracing::error!(error = %error, "Run setup failed");
        self.phase = RunPhase::Failed;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::prompts::DEFAULT_PROMPTS;
    use crate::providers::StepResult;
    use crate::run::{load_ledger, STATE_FILE};
    use async_trait::async_trait;
    use clarity_core::rules::PhraseRule;
    use clarity_core::{Normalization, ParamBag, Rule, ScoringError};
    use serde_json::Value as JsonValue;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    use crate::config::SamplingConfig;

    const TEMPLATE: &str = r#"
name: helpful
rules:
  - kind: contains_phrase
    weight: 2.0
    params:
      phrase: helpful
  - kind: word_count
    weight: 1.0
    params:
      min_words: 5
      max_words: 100
"#;

    #[derive(Default)]
    struct MockProvider {
        transient_failures: AtomicU32,
        unavailable: AtomicBool,
        fail_load: bool,
        fail_validate: bool,
        released: AtomicU32,
        loaded: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn loaded(&self) -> Vec<String> {
            self.loaded.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn load(&self, model_id: &str) -> Result<ModelHandle, BackendError> {
            self.loaded.lock().unwrap().push(model_id.to_string());
            if self.fail_load {
                return Err(BackendError::Unavailable("no weights".into()));
            }
            Ok(ModelHandle::new(model_id, "mock-0"))
        }

        async fn validate(&self, _handle: &ModelHandle) -> Result<(), BackendError> {
            if self.fail_validate {
                return Err(BackendError::Fatal("corrupt weights".into()));
            }
            Ok(())
        }

        async fn generate(
            &self,
            _handle: &ModelHandle,
            prompt: &str,
            _sampling: &SamplingConfig,
            count: usize,
        ) -> Result<Vec<String>, BackendError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("gpu offline".into()));
            }
            if self.transient_failures.load(Ordering::SeqCst) > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::Transient("busy".into()));
            }
            Ok((0..count)
                .map(|i| {
                    if i % 2 == 0 {
                        format!("{prompt}: a helpful and detailed answer number {i}")
                    } else {
                        format!("no {i}")
                    }
                })
                .collect())
        }

        async fn release(&self, _handle: &ModelHandle) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct AlwaysFails;

    impl Rule for AlwaysFails {
        fn kind(&self) -> &str {
            "always_fails"
        }

        fn params(&self) -> ParamBag {
            ParamBag::new()
        }

        fn evaluate(&self, _text: &str) -> Result<f64, ScoringError> {
            Err(ScoringError::Unclassifiable {
                kind: "always_fails".into(),
                reason: "classifier offline".into(),
            })
        }
    }

    #[derive(Default)]
    struct MockOptimizer {
        batches: Mutex<Vec<StepBatch>>,
        checkpoints: Mutex<Vec<(PathBuf, u64)>>,
        fail_at_step: Option<u64>,
        cancel_at_step: Option<(u64, CancelFlag)>,
    }

    impl MockOptimizer {
        fn steps(&self) -> Vec<u64> {
            self.batches.lock().unwrap().iter().map(|b| b.step).collect()
        }
    }

    #[async_trait]
    impl Optimizer for MockOptimizer {
        fn name(&self) -> &str {
            "mock"
        }

        async fn prepare(
            &self,
            _handle: &ModelHandle,
            settings: &BTreeMap<String, JsonValue>,
        ) -> Result<(), BackendError> {
            if settings.contains_key("learning_rate") {
                Ok(())
            } else {
                Err(BackendError::Fatal("missing learning_rate".into()))
            }
        }

        async fn submit_step(&self, batch: &StepBatch) -> Result<StepResult, BackendError> {
            if self.fail_at_step == Some(batch.step) {
                return Err(BackendError::Fatal("loss diverged".into()));
            }
            self.batches.lock().unwrap().push(batch.clone());
            if let Some((step, flag)) = &self.cancel_at_step {
                if *step == batch.step {
                    flag.cancel();
                }
            }
            Ok(StepResult {
                loss: Some(0.1),
                ..StepResult::default()
            })
        }

        async fn checkpoint(&self, dir: &Path, step: u64) -> Result<(), BackendError> {
            self.checkpoints.lock().unwrap().push((dir.to_path_buf(), step));
            Ok(())
        }
    }

    fn config_in(dir: &Path) -> RunConfig {
        let template_path = dir.join("helpful.yaml");
        fs::write(&template_path, TEMPLATE).unwrap();
        RunConfig {
            template_path,
            output_dir: dir.join("runs"),
            max_steps: 3,
            batch_size: 2,
            candidates_per_prompt: 2,
            save_every: 2,
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                multiplier: 2.0,
            },
            ..RunConfig::default()
        }
    }

    #[tokio::test]
    async fn test_full_run_completes() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(MockProvider::default());
        let optimizer = Arc::new(MockOptimizer::default());
        let mut orch =
            Orchestrator::new(config_in(dir.path()), provider.clone(), optimizer.clone()).unwrap();

        let summary = orch.train().await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.average_reward, 0.5);
        assert_eq!(orch.phase(), RunPhase::Completed);
        assert_eq!(optimizer.steps(), vec![1, 2, 3]);
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);

        let checkpoints = optimizer.checkpoints.lock().unwrap().clone();
        assert_eq!(
            checkpoints,
            vec![
                (summary.run_dir.join("checkpoint-2"), 2),
                (summary.run_dir.join("final"), 3),
            ]
        );

        let saved = RunState::load(summary.run_dir.join(STATE_FILE)).unwrap();
        assert_eq!(saved.step, 3);
        assert_eq!(saved.status, RunStatus::Completed);

        let ledger = load_ledger(dir.path().join("runs")).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].run_id, summary.run_id);
        assert_eq!(ledger[0].total_steps, 3);
    }

    #[tokio::test]
    async fn test_samples_follow_prompt_order() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(MockProvider::default());
        let optimizer = Arc::new(MockOptimizer::default());
        let mut orch =
            Orchestrator::new(config_in(dir.path()), provider, optimizer.clone()).unwrap();
        orch.train().await.unwrap();

        let batches = optimizer.batches.lock().unwrap().clone();
        let first: Vec<&str> = batches[0].prompts().collect();
        assert_eq!(
            first,
            vec![DEFAULT_PROMPTS[0], DEFAULT_PROMPTS[0], DEFAULT_PROMPTS[1], DEFAULT_PROMPTS[1]]
        );
        assert_eq!(batches[1].samples[0].prompt, DEFAULT_PROMPTS[2]);

        for sample in &batches[0].samples {
            assert!(sample.response.starts_with(&sample.prompt) || sample.response.starts_with("no"));
            let expected = if sample.response.contains("helpful") { 1.0 } else { 0.0 };
            assert_eq!(sample.reward, expected);
        }
    }

    #[tokio::test]
    async fn test_transient_generation_failures_retried() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(MockProvider {
            transient_failures: AtomicU32::new(2),
            ..MockProvider::default()
        });
        let optimizer = Arc::new(MockOptimizer::default());
        let mut orch =
            Orchestrator::new(config_in(dir.path()), provider.clone(), optimizer.clone()).unwrap();

        let summary = orch.train().await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(provider.transient_failures.load(Ordering::SeqCst), 0);
        assert_eq!(optimizer.steps(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_run() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(MockProvider {
            unavailable: AtomicBool::new(true),
            ..MockProvider::default()
        });
        let optimizer = Arc::new(MockOptimizer::default());
        let mut orch =
            Orchestrator::new(config_in(dir.path()), provider.clone(), optimizer.clone()).unwrap();

        let err = orch.train().await.unwrap_err();
        assert_eq!(err.stage, Stage::Generation);
        assert_eq!(err.step, Some(1));
        assert!(matches!(
            err.source,
            FailureCause::Backend(BackendError::Unavailable(_))
        ));
        assert!(err.to_string().starts_with("generation failed at step 1"));

        assert_eq!(orch.phase(), RunPhase::Failed);
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);

        let ledger = load_ledger(dir.path().join("runs")).unwrap();
        assert_eq!(ledger[0].status, RunStatus::Failed);
        assert!(ledger[0].error.as_deref().unwrap_or("").contains("generation"));
    }

    #[tokio::test]
    async fn test_optimizer_failure_preserves_progress() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(MockProvider::default());
        let optimizer = Arc::new(MockOptimizer {
            fail_at_step: Some(2),
            ..MockOptimizer::default()
        });
        let mut orch =
            Orchestrator::new(config_in(dir.path()), provider, optimizer.clone()).unwrap();

        let err = orch.train().await.unwrap_err();
        assert_eq!(err.stage, Stage::Optimization);
        assert_eq!(err.step, Some(2));
        assert!(optimizer.checkpoints.lock().unwrap().is_empty());

        let state = orch.state().unwrap();
        assert_eq!(state.step, 1);
        assert_eq!(state.status, RunStatus::Failed);

        let saved = RunState::load(state.state_path()).unwrap();
        assert_eq!(saved.step, 1);
        assert_eq!(saved.stats.history.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_continues_from_saved_step() {
        let dir = tempdir().unwrap();
        let failing = Arc::new(MockOptimizer {
            fail_at_step: Some(2),
            ..MockOptimizer::default()
        });
        let mut first = Orchestrator::new(
            config_in(dir.path()),
            Arc::new(MockProvider::default()),
            failing,
        ).unwrap();
        assert!(first.train().await.is_err());
        let state_path = first.state().unwrap().state_path();
        let run_id = first.state().unwrap().run_id.clone();

        let optimizer = Arc::new(MockOptimizer::default());
        let mut second = Orchestrator::new(
            RunConfig::default(),
            Arc::new(MockProvider::default()),
            optimizer.clone(),
        ).unwrap();
        second.resume_from(RunState::load(&state_path).unwrap()).unwrap();
        let summary = second.train().await.unwrap();

        assert_eq!(summary.run_id, run_id);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(optimizer.steps(), vec![2, 3]);
        assert_eq!(second.state().unwrap().stats.rewards.count(), 12);

        let ledger = load_ledger(dir.path().join("runs")).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[1].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_loads_last_checkpoint() {
        let dir = tempdir().unwrap();
        let first_provider = Arc::new(MockProvider::default());
        let failing = Arc::new(MockOptimizer {
            fail_at_step: Some(3),
            ..MockOptimizer::default()
        });
        let mut first =
            Orchestrator::new(config_in(dir.path()), first_provider.clone(), failing).unwrap();
        let err = first.train().await.unwrap_err();
        assert_eq!(err.step, Some(3));
        assert_eq!(first_provider.loaded(), vec![RunConfig::default().model_id]);

        let saved = RunState::load(first.state().unwrap().state_path()).unwrap();
        let checkpoint = saved.run_dir().join("checkpoint-2");
        assert_eq!(saved.last_checkpoint.as_deref(), Some(checkpoint.as_path()));

        let provider = Arc::new(MockProvider::default());
        let optimizer = Arc::new(MockOptimizer::default());
        let mut second =
            Orchestrator::new(RunConfig::default(), provider.clone(), optimizer.clone()).unwrap();
        second.resume_from(saved).unwrap();
        assert_eq!(second.model_source(), checkpoint.display().to_string());

        let summary = second.train().await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(provider.loaded(), vec![checkpoint.display().to_string()]);
        assert_eq!(optimizer.steps(), vec![3]);
    }

    #[tokio::test]
    async fn test_resume_rejects_invalid_snapshot() {
        let dir = tempdir().unwrap();
        let mut state = RunState::new("run_20250101_000000", config_in(dir.path()), Utc::now());
        state.config.batch_size = 0;

        let mut orch = Orchestrator::new(
            RunConfig::default(),
            Arc::new(MockProvider::default()),
            Arc::new(MockOptimizer::default()),
        )
        .unwrap();
        let err = orch.resume_from(state).unwrap_err();
        assert_eq!(err.stage, Stage::Configuration);
        assert!(orch.state().is_none());
    }

    #[test]
    fn test_invalid_config_rejected_on_construction() {
        let config = RunConfig {
            max_steps: 0,
            ..RunConfig::default()
        };
        let result = Orchestrator::new(
            config,
            Arc::new(MockProvider::default()),
            Arc::new(MockOptimizer::default()),
        );
        let Err(err) = result else {
            panic!("zero max_steps was accepted");
        };
        assert_eq!(err.stage, Stage::Configuration);
        assert!(matches!(
            err.source,
            FailureCause::Config(ConfigFileError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_rule_failures_do_not_abort_step() {
        let dir = tempdir().unwrap();
        let mut rubric = Rubric::new("flaky");
        rubric.push_rule(PhraseRule::phrase("helpful").unwrap(), 1.0).unwrap();
        rubric.push_rule(AlwaysFails, 1.0).unwrap();

        let config = RunConfig {
            max_steps: 1,
            ..config_in(dir.path())
        };
        let optimizer = Arc::new(MockOptimizer::default());
        let mut orch =
            Orchestrator::new(config, Arc::new(MockProvider::default()), optimizer.clone()).unwrap();
        orch.use_rubric(rubric).unwrap();
        orch.load_model().await.unwrap();
        orch.setup_trainer().await.unwrap();

        let summary = orch.run().await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total_steps, 1);

        let record = orch.state().unwrap().stats.last().unwrap();
        assert_eq!(record.samples, 4);
        assert_eq!(record.diagnostics, 4);

        let rewards: Vec<f64> = optimizer.batches.lock().unwrap()[0].rewards().collect();
        assert_eq!(rewards, vec![0.5, 0.0, 0.5, 0.0]);
    }

    #[tokio::test]
    async fn test_cancellation_between_steps() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(MockProvider::default());
        let mut orch = Orchestrator::new(
            config_in(dir.path()),
            provider.clone(),
            Arc::new(MockOptimizer::default()),
        ).unwrap();
        let optimizer = Arc::new(MockOptimizer {
            cancel_at_step: Some((1, orch.cancel_flag())),
            ..MockOptimizer::default()
        });
        orch.optimizer = optimizer.clone() as Arc<dyn Optimizer>;

        let summary = orch.train().await.unwrap();
        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.total_steps, 1);
        assert_eq!(optimizer.steps(), vec![1]);
        assert!(optimizer.checkpoints.lock().unwrap().is_empty());
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);

        let ledger = load_ledger(dir.path().join("runs")).unwrap();
        assert_eq!(ledger[0].status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_stages_out_of_order() {
        let dir = tempdir().unwrap();
        let mut orch = Orchestrator::new(
            config_in(dir.path()),
            Arc::new(MockProvider::default()),
            Arc::new(MockOptimizer::default()),
        ).unwrap();

        let err = orch.load_model().await.unwrap_err();
        assert!(matches!(
            err.source,
            FailureCause::InvalidPhase {
                phase: RunPhase::Uninitialized,
                ..
            }
        ));
        assert_eq!(orch.phase(), RunPhase::Uninitialized);

        orch.load_template().unwrap();
        let err = orch.run().await.unwrap_err();
        assert!(matches!(err.source, FailureCause::InvalidPhase { .. }));
        assert_eq!(orch.phase(), RunPhase::TemplateLoaded);
    }

    #[tokio::test]
    async fn test_missing_template_is_fatal() {
        let dir = tempdir().unwrap();
        let config = RunConfig {
            template_path: dir.path().join("absent.yaml"),
            ..config_in(dir.path())
        };
        let mut orch = Orchestrator::new(
            config,
            Arc::new(MockProvider::default()),
            Arc::new(MockOptimizer::default()),
        ).unwrap();

        let err = orch.load_template().unwrap_err();
        assert_eq!(err.stage, Stage::TemplateLoad);
        assert!(matches!(
            err.source,
            FailureCause::Config(ConfigFileError::NotFound(_))
        ));
        assert_eq!(orch.phase(), RunPhase::Failed);
    }

    #[tokio::test]
    async fn test_model_load_failures() {
        let dir = tempdir().unwrap();

        let provider = Arc::new(MockProvider {
            fail_load: true,
            ..MockProvider::default()
        });
        let mut orch = Orchestrator::new(
            config_in(dir.path()),
            provider.clone(),
            Arc::new(MockOptimizer::default()),
        ).unwrap();
        let err = orch.train().await.unwrap_err();
        assert_eq!(err.stage, Stage::ModelLoad);
        assert_eq!(provider.released.load(Ordering::SeqCst), 0);

        let provider = Arc::new(MockProvider {
            fail_validate: true,
            ..MockProvider::default()
        });
        let mut orch = Orchestrator::new(
            config_in(dir.path()),
            provider.clone(),
            Arc::new(MockOptimizer::default()),
        ).unwrap();
        let err = orch.train().await.unwrap_err();
        assert_eq!(err.stage, Stage::ModelLoad);
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trainer_setup_failure_releases_model() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(MockProvider::default());
        let config = RunConfig {
            optimizer: BTreeMap::new(),
            ..config_in(dir.path())
        };
        let mut orch =
            Orchestrator::new(config, provider.clone(), Arc::new(MockOptimizer::default())).unwrap();

        let err = orch.train().await.unwrap_err();
        assert_eq!(err.stage, Stage::TrainerSetup);
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rank_normalization_scopes() {
        for (scope, expected_top) in [
            (NormalizationScope::PerPrompt, 0.75),
            (NormalizationScope::Batch, 0.7),
        ] {
            let dir = tempdir().unwrap();
            let config = RunConfig {
                max_steps: 1,
                candidates_per_prompt: 3,
                normalization: Normalization::Rank,
                normalization_scope: scope,
                ..config_in(dir.path())
            };
            let optimizer = Arc::new(MockOptimizer::default());
            let mut orch =
                Orchestrator::new(config, Arc::new(MockProvider::default()), optimizer.clone()).unwrap();
            orch.train().await.unwrap();

            let batches = optimizer.batches.lock().unwrap().clone();
            let rewards: Vec<f64> = batches[0].rewards().collect();
            assert_eq!(rewards.len(), 6);
            assert!((rewards[0] - expected_top).abs() < 1e-12, "{scope:?}: {rewards:?}");
            assert!(rewards[0] > rewards[1]);
        }
    }
}
