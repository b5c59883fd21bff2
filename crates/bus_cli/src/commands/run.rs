//! Run command - Execute a whole job in this process.
//!
//! Uses in-process queue and stores, so no Redis or Postgres is needed.
//! The artifacts are exported to `<output>/<job_id>/`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bus_agents::export_artifacts;
use bus_core::WorkflowStatus;
use bus_worker::{build_local_container, Runtime, TaskStatus};
use clap::Args;
use tracing::info;

use super::{default_project_name, job_options, load_settings, CliError};

#[derive(Args)]
pub struct RunArgs {
    /// Plain-language requirement
    requirement: String,

    /// Project name (derived from the requirement by default)
    #[arg(short, long)]
    project: Option<String>,

    /// Directory the artifacts are exported to
    #[arg(short, long, default_value = "agent-bus-output")]
    output: PathBuf,

    /// Optional stages to skip, comma separated (ui_ux_design, support_docs)
    #[arg(long)]
    skip: Option<String>,
}

pub async fn execute(config: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let options = job_options(args.skip.as_deref())?;
    let project = args
        .project
        .unwrap_or_else(|| default_project_name(&args.requirement));

    let runtime = Runtime::from_container(&build_local_container(settings))
        .await
        .context("Failed to build local services")?;
    if runtime.services.llm.is_none() {
        println!("No LLM configured; artifacts are generated from deterministic templates.");
    }

    let job = runtime
        .coordinator
        .submit(args.requirement, project, options)
        .await?;
    println!("Job {} ({})", job.id, job.project_name);

    // Retries come back after their backoff, so poll for at least that long.
    let worker_config = runtime.worker.config();
    let poll = worker_config
        .poll_timeout
        .max(worker_config.backoff_for(worker_config.max_attempts));
    let job = loop {
        let current = runtime.coordinator.job(job.id).await?;
        if current.status.is_terminal() {
            break current;
        }
        match runtime.worker.run_once(poll).await? {
            Some(result) => {
                let marker = match result.status {
                    TaskStatus::Succeeded => "ok",
                    TaskStatus::Retrying => "retry",
                    TaskStatus::Skipped => "skip",
                    _ => "FAILED",
                };
                println!(
                    "  [{:>6}] {:<20} {:>6}ms",
                    marker,
                    result.stage.as_str(),
                    result.duration_ms
                );
            }
            None => {
                let current = runtime.coordinator.job(job.id).await?;
                if !current.status.is_terminal() {
                    anyhow::bail!("Job {} stalled with no queued tasks", job.id);
                }
            }
        }
    };

    let dir = args.output.join(job.id.to_string());
    let files = export_artifacts(runtime.artifacts().as_ref(), job.id, &dir)
        .await
        .with_context(|| format!("Failed to export artifacts to {}", dir.display()))?;
    info!("Exported {} files to {}", files.len(), dir.display());

    println!();
    println!("Status:    {}", job.status);
    println!("Artifacts: {} files in {}", files.len(), dir.display());

    if job.status != WorkflowStatus::Completed {
        return Err(CliError::PipelineFailed {
            job_id: job.id,
            reason: job.error.unwrap_or_else(|| job.status.to_string()),
        }
        .into());
    }
    Ok(())
}
