//! Worker command - Process queued tasks until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bus_worker::{build_container, Runtime};
use clap::Args;
use tokio::sync::watch;
use tracing::{info, warn};

use super::load_settings;

#[derive(Args)]
pub struct WorkerArgs {
    /// Number of tasks processed at once
    #[arg(short = 'n', long)]
    concurrency: Option<usize>,
}

pub async fn execute(config: Option<PathBuf>, args: WorkerArgs) -> Result<()> {
    let mut settings = load_settings(config.as_deref())?;
    if let Some(concurrency) = args.concurrency {
        settings.worker.concurrency = concurrency.max(1);
    }

    let container = build_container(settings);
    let runtime = Runtime::from_container(&container)
        .await
        .context("Failed to start worker services")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for interrupt: {}", e);
            // Keep the sender alive; dropping it would stop the worker.
            std::future::pending::<()>().await;
        }
        info!("Interrupt received, finishing in-flight tasks");
        let _ = shutdown_tx.send(true);
    });

    runtime.worker.run(shutdown_rx).await?;
    Ok(())
}
