//! Clarity CLI
//!
//! Command-line interface for rubric scoring and training run inspection.
//!
//! ## Usage
//!
//! ```bash
//! # Score a response against a template
//! clarity score --template templates/helpful.yaml --output response.txt
//!
//! # Pipe from stdin, with explanations
//! cat response.txt | clarity score --template templates/helpful.yaml --explain
//!
//! # JSON output
//! clarity score --template templates/helpful.yaml --output response.txt --format json
//!
//! # Validate a template
//! clarity template validate templates/helpful.yaml
//!
//! # List recorded training runs
//! clarity runs --output-dir runs
//! ```
//!
//! ## Exit Codes
//!
//! - 0: Success
//! - 1: Invalid template or configuration, including the template given to `score`
//! - 2: Error

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clarity_core::{ExplainedEvaluation, Evaluation, Rubric};
use clarity_runtime::{load_ledger, RunConfig};

const EXIT_INVALID: u8 = 1;
const EXIT_ERROR: u8 = 2;

/// Clarity: rubric rewards for language model training
#[derive(Parser)]
#[command(name = "clarity")]
#[command(version)]
#[command(about = "Score text against rubric templates and inspect training runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a text against a template
    Score {
        /// Path to the template (YAML or JSON)
        #[arg(short, long)]
        template: PathBuf,

        /// Path to the text to score (reads from stdin if not provided)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Show per-rule explanations and feedback
        #[arg(long)]
        explain: bool,
    },

    /// Template management commands
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Run configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List training runs recorded in the ledger
    Runs {
        /// Directory holding training_ledger.yaml
        #[arg(long, default_value = "runs")]
        output_dir: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Validate a template file
    Validate {
        /// Path to the template file
        path: PathBuf,
    },

    /// Show template details
    Show {
        /// Path to the template file
        path: PathBuf,
    },

    /// List templates in a directory
    List {
        /// Directory containing templates
        #[arg(default_value = "./templates")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a run configuration file
    Validate {
        /// Path to the configuration file
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(exit_code) => exit_code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            template,
            output,
            format,
            explain,
        } => score_command(&template, output.as_deref(), format, explain),

        Commands::Template { action } => match action {
            TemplateAction::Validate { path } => validate_template(&path),
            TemplateAction::Show { path } => show_template(&path),
            TemplateAction::List { path } => list_templates(&path),
        },

        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => validate_config(&path),
        },

        Commands::Runs { output_dir, format } => list_runs(&output_dir, format),
    }
}

fn score_command(
    template_path: &Path,
    output_path: Option<&Path>,
    format: OutputFormat,
    explain: bool,
) -> Result<ExitCode> {
    let Some(rubric) = load_template(template_path) else {
        return Ok(ExitCode::from(EXIT_INVALID));
    };

    let text = match output_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read text from {:?}", path))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    if explain {
        let explained = rubric.explain(&text);
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&explained)?),
            OutputFormat::Text => print_explained(&rubric, &explained),
        }
    } else {
        let evaluation = rubric.evaluate(&text);
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&evaluation)?),
            OutputFormat::Text => print_evaluation(&rubric, &evaluation),
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_evaluation(rubric: &Rubric, evaluation: &Evaluation) {
    println!("Template: {}", rubric.name);
    println!("Score: {:.3}", evaluation.score);
    println!();

    for rule in &evaluation.breakdown {
        println!(
            "  {}. {} (weight {}): {:.3} -> {:.3}",
            rule.index + 1,
            rule.kind,
            rule.weight,
            rule.partial,
            rule.contribution
        );
        if let Some(diagnostic) = &rule.diagnostic {
            println!("     ! {}", diagnostic);
        }
    }
}

fn print_explained(rubric: &Rubric, explained: &ExplainedEvaluation) {
    print_evaluation(rubric, &explained.evaluation);

    println!();
    println!("--- Explanations ---");
    println!();
    for explanation in &explained.explanations {
        println!("{} ({:.2}): {}", explanation.kind, explanation.score, explanation.reasoning);
        for evidence in &explanation.evidence {
            println!("  - {}", evidence);
        }
    }

    let feedback = &explained.feedback;
    println!();
    println!("Interpretation: {}", feedback.interpretation.description());

    let sections = [
        ("Strengths", &feedback.strengths),
        ("Weaknesses", &feedback.weaknesses),
        ("Suggestions", &feedback.suggestions),
    ];
    for (title, items) in sections {
        if items.is_empty() {
            continue;
        }
        println!();
        println!("{}:", title);
        for item in items {
            println!("  - {}", item);
        }
    }
}

/// Load a template, reporting why it is invalid on stderr.
fn load_template(path: &Path) -> Option<Rubric> {
    match Rubric::from_file(path) {
        Ok(rubric) => Some(rubric),
        Err(e) => {
            eprintln!("Template validation failed for {:?}: {}", path, e);
            None
        }
    }
}

fn validate_template(path: &Path) -> Result<ExitCode> {
    let Some(rubric) = load_template(path) else {
        return Ok(ExitCode::from(EXIT_INVALID));
    };

    println!("Template is valid: {}", rubric.name);
    println!();
    println!("Rules: {}", rubric.len());
    println!("Total weight: {}", rubric.total_weight());
    Ok(ExitCode::SUCCESS)
}

fn show_template(path: &Path) -> Result<ExitCode> {
    let Some(rubric) = load_template(path) else {
        return Ok(ExitCode::from(EXIT_INVALID));
    };

    println!("Template: {}", rubric.name);
    if !rubric.description.is_empty() {
        println!("Description: {}", rubric.description);
    }
    println!();

    println!("Rules:");
    for (i, entry) in rubric.to_structured_form().rules.iter().enumerate() {
        println!("  {}. {} (weight {})", i + 1, entry.kind, entry.weight);
        for (key, value) in &entry.params {
            println!("       {}: {}", key, value);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn list_templates(path: &Path) -> Result<ExitCode> {
    let entries = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read directory {:?}", path))?;

    let mut found = false;
    for entry in entries {
        let path = entry?.path();
        let is_template = path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml" || e == "json");
        if !is_template {
            continue;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match Rubric::from_file(&path) {
            Ok(rubric) => {
                println!("{}: {} ({} rules)", file_name, rubric.name, rubric.len());
                found = true;
            }
            Err(e) => {
                eprintln!("{}: INVALID - {}", file_name, e);
            }
        }
    }

    if !found {
        println!("No templates found in {:?}", path);
    }

    Ok(ExitCode::SUCCESS)
}

fn validate_config(path: &Path) -> Result<ExitCode> {
    match RunConfig::from_file(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!();
            println!("Model: {}", config.model_id);
            println!("Template: {}", config.template_path.display());
            println!("Steps: {} x {} prompts", config.max_steps, config.batch_size);
            println!("Normalization: {}", config.normalization);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Configuration validation failed: {}", e);
            Ok(ExitCode::from(EXIT_INVALID))
        }
    }
}

fn list_runs(output_dir: &Path, format: OutputFormat) -> Result<ExitCode> {
    let runs = load_ledger(output_dir)
        .with_context(|| format!("Failed to read ledger in {:?}", output_dir))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No training runs recorded in {:?}", output_dir);
            }
            for run in &runs {
                println!(
                    "{}  {:<9}  {} steps  avg {:.3}  final {:.3}  {}",
                    run.run_id,
                    run.status.to_string(),
                    run.total_steps,
                    run.average_reward,
                    run.final_reward,
                    run.model_id
                );
                if let Some(error) = &run.error {
                    println!("    error: {}", error);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
