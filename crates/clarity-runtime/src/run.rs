//! Training run state, checkpoints, and the run ledger.
//!
//! Layout under `output_dir`:
//!
//! ```text
//! training_ledger.yaml          one record per finished run
//! <run_id>/run_state.json       latest run state checkpoint
//! <run_id>/checkpoint-<step>/   optimizer checkpoints
//! <run_id>/final/               final optimizer checkpoint
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::RunConfig;
use crate::stats::RewardStats;

pub const LEDGER_FILE: &str = "training_ledger.yaml";
pub const STATE_FILE: &str = "run_state.json";

/// Errors reading or writing run artifacts.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access run artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Uninitialized,
    TemplateLoaded,
    ModelLoaded,
    TrainerReady,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Uninitialized => "uninitialized",
            RunPhase::TemplateLoaded => "template loaded",
            RunPhase::ModelLoaded => "model loaded",
            RunPhase::TrainerReady => "trainer ready",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Outcome recorded for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Generate a run id from a timestamp: `run_YYYYMMDD_HHMMSS`.
pub fn run_id_at(at: DateTime<Utc>) -> String {
    format!("run_{}", at.format("%Y%m%d_%H%M%S"))
}

/// State owned and mutated by the orchestrator loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,

    /// Snapshot of the configuration the run started with
    pub config: RunConfig,

    /// Last completed step (0 before the first)
    pub step: u64,

    pub stats: RewardStats,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Most recent optimizer checkpoint directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, config: RunConfig, started_at: DateTime<Utc>) -> Self {
        let history_limit = config.history_limit;
        Self {
            run_id: run_id.into(),
            config,
            step: 0,
            stats: RewardStats::new(history_limit),
            status: RunStatus::Running,
            started_at,
            updated_at: started_at,
            last_checkpoint: None,
            error: None,
        }
    }

    /// `<output_dir>/<run_id>`
    pub fn run_dir(&self) -> PathBuf {
        self.config.output_dir.join(&self.run_id)
    }

    pub fn state_path(&self) -> PathBuf {
        self.run_dir().join(STATE_FILE)
    }

    /// Write the state atomically: temp file, then rename over the old one.
    pub fn save(&self) -> Result<PathBuf, StoreError> {
        let path = self.state_path();
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let bytes = fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Summarize the run for the ledger.
    pub fn to_record(&self, ended_at: Option<DateTime<Utc>>) -> RunRecord {
        RunRecord {
            run_id: self.run_id.clone(),
            model_id: self.config.model_id.clone(),
            template_path: self.config.template_path.clone(),
            config: self.config.clone(),
            start_time: self.started_at,
            end_time: ended_at,
            total_steps: self.step,
            average_reward: self.stats.average_reward(),
            final_reward: self.stats.final_reward(),
            status: self.status,
            error: self.error.clone(),
            step_rewards: self.stats.history.iter().map(|r| r.mean_reward).collect(),
        }
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub model_id: String,
    pub template_path: PathBuf,
    pub config: RunConfig,
    pub start_time: DateTime<Utc>,

    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    pub total_steps: u64,
    pub average_reward: f64,
    pub final_reward: f64,
    pub status: RunStatus,

    #[serde(default)]
    pub error: Option<String>,

    /// Mean reward of the most recent steps, oldest first
    #[serde(default)]
    pub step_rewards: Vec<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    #[serde(default)]
    runs: Vec<RunRecord>,
}

pub fn ledger_path(output_dir: &Path) -> PathBuf {
    output_dir.join(LEDGER_FILE)
}

/// Read every record in the ledger. A missing ledger is an empty one.
pub fn load_ledger(output_dir: impl AsRef<Path>) -> Result<Vec<RunRecord>, StoreError> {
    let path = ledger_path(output_dir.as_ref());
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    let ledger: Ledger = serde_yaml::from_str(&contents)?;
    Ok(ledger.runs)
}

/// Append a record to the ledger under `output_dir`.
pub fn append_to_ledger(output_dir: impl AsRef<Path>, record: RunRecord) -> Result<PathBuf, StoreError> {
    let output_dir = output_dir.as_ref();
    let mut ledger = Ledger {
        runs: load_ledger(output_dir)?,
    };
    ledger.runs.push(record);

    let path = ledger_path(output_dir);
    write_atomic(&path, serde_yaml::to_string(&ledger)?.as_bytes())?;
    Ok(path)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
