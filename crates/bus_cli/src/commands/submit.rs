//! Submit command - Queue a new job for the workers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bus_worker::{build_container, Runtime};
use clap::Args;
use tracing::info;

use super::{default_project_name, job_options, load_settings};

#[derive(Args)]
pub struct SubmitArgs {
    /// Plain-language requirement
    requirement: String,

    /// Project name (derived from the requirement by default)
    #[arg(short, long)]
    project: Option<String>,

    /// Optional stages to skip, comma separated (ui_ux_design, support_docs)
    #[arg(long)]
    skip: Option<String>,
}

pub async fn execute(config: Option<PathBuf>, args: SubmitArgs) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let options = job_options(args.skip.as_deref())?;
    let project = args
        .project
        .unwrap_or_else(|| default_project_name(&args.requirement));

    let runtime = Runtime::from_container(&build_container(settings))
        .await
        .context("Failed to connect to pipeline services")?;
    let job = runtime
        .coordinator
        .submit(args.requirement, project, options)
        .await?;
    info!("Job {} queued", job.id);

    let queued: Vec<&str> = job
        .workflow
        .active_stages()
        .into_iter()
        .map(|s| s.as_str())
        .collect();
    println!("Job:     {}", job.id);
    println!("Project: {}", job.project_name);
    println!("Status:  {}", job.status);
    println!("Queued:  {}", queued.join(", "));
    let skipped = job.workflow.skipped_stages();
    if !skipped.is_empty() {
        let names: Vec<&str> = skipped.iter().map(|s| s.as_str()).collect();
        println!("Skipped: {}", names.join(", "));
    }
    Ok(())
}
