//! CLI command definitions.
//!
//! Each subcommand maps to one way of driving the pipeline: a long-running
//! worker, job submission and inspection, a single-process run, and the
//! shared memory store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bus_core::Settings;
use bus_worker::{parse_skip, SKIP_OPTION};
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub mod memory;
pub mod run;
pub mod stages;
pub mod status;
pub mod submit;
pub mod worker;

/// agent-bus - multi-agent software delivery pipeline
#[derive(Parser)]
#[command(name = "agent-bus")]
#[command(version, about = "agent-bus - multi-agent software delivery pipeline")]
#[command(long_about = r#"
agent-bus turns a plain-language requirement into a set of delivery
artifacts (PRD, plan, architecture, UI/UX spec, code plan, QA plan, security
audit, documentation, support guide and delivery package) by running one
agent per workflow stage.

COMMANDS:
  worker   → Process queued stage tasks until interrupted
  submit   → Queue a new job
  status   → Show a job and its tasks
  run      → Run a whole job in this process and export the artifacts
  stages   → Print the workflow transition table
  memory   → Index files into or search the shared memory store

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Configuration error
  4 - Pipeline failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file (TOML or YAML)
    #[arg(short, long, global = true, env = "AGENT_BUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a worker that processes queued tasks
    Worker(worker::WorkerArgs),

    /// Submit a requirement as a new job
    Submit(submit::SubmitArgs),

    /// Show the status of a job
    Status(status::StatusArgs),

    /// Run a job end to end in this process
    Run(run::RunArgs),

    /// Print the workflow stages and transitions
    Stages(stages::StagesArgs),

    /// Index or search the memory store
    Memory(memory::MemoryArgs),
}

/// Failures reported with a dedicated exit code.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Job {job_id} failed: {reason}")]
    PipelineFailed { job_id: Uuid, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Load and validate settings.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = Settings::load(path).context("Failed to load settings")?;
    settings.validate().context("Invalid settings")?;
    debug!(
        "Settings loaded (llm={}, memory={}, redis={})",
        settings.llm.provider, settings.memory.backend, settings.redis.url
    );
    Ok(settings)
}

/// Job options from the `--skip` flag.
pub fn job_options(skip: Option<&str>) -> Result<HashMap<String, String>> {
    let mut options = HashMap::new();
    if let Some(raw) = skip {
        let stages = parse_skip(raw)?;
        if let Some(stage) = stages.iter().find(|s| !s.is_optional()) {
            return Err(CliError::InvalidArgument(format!("stage '{}' cannot be skipped", stage)).into());
        }
        let names: Vec<&str> = stages.iter().map(|s| s.as_str()).collect();
        options.insert(SKIP_OPTION.to_string(), names.join(","));
    }
    Ok(options)
}

/// Project name derived from the first words of a requirement.
pub fn default_project_name(requirement: &str) -> String {
    let words: Vec<String> = requirement
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(4)
        .map(str::to_lowercase)
        .collect();
    if words.is_empty() {
        "project".to_string()
    } else {
        words.join("-")
    }
}
