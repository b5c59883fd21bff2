//! Status command - Show a job, its workflow and its tasks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bus_core::{services, Settings};
use bus_worker::{build_container, JobStore, WorkerError};
use clap::Args;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::load_settings;

#[derive(Args)]
pub struct StatusArgs {
    /// Job id printed by `submit`
    job_id: Uuid,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

pub async fn execute(config: Option<PathBuf>, args: StatusArgs) -> Result<()> {
    let settings: Settings = load_settings(config.as_deref())?;
    if settings.postgres.url.is_none() {
        warn!("DATABASE_URL is not set; jobs submitted by other processes are not visible");
    }

    let container = build_container(settings);
    let store = container
        .resolve::<Arc<dyn JobStore>>(services::JOB_STORE)
        .await
        .context("Failed to open job store")?;

    let job = store
        .get_job(args.job_id)
        .await?
        .ok_or(WorkerError::JobNotFound(args.job_id))?;
    let tasks = store.list_tasks(job.id).await?;

    if args.json {
        let report = json!({ "job": job, "tasks": tasks });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Job:      {}", job.id);
    println!("Project:  {}", job.project_name);
    println!("Status:   {}", job.status);
    println!("Progress: {:.0}%", job.workflow.progress() * 100.0);
    println!("Stage:    {}", job.workflow.current_stage());
    if let Some(error) = &job.error {
        println!("Error:    {}", error);
    }

    println!();
    println!("{:<22} {:<10} {:>7}  {}", "STAGE", "STATUS", "ATTEMPT", "UPDATED");
    for task in &tasks {
        println!(
            "{:<22} {:<10} {:>7}  {}",
            task.stage.as_str(),
            task.status.as_str(),
            task.attempt,
            task.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = &task.error {
            println!("  error: {}", error);
        }
    }
    Ok(())
}
