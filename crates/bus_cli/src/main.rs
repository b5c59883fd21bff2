//! agent-bus CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Configuration error
//! - 4: Pipeline failure

use std::process::ExitCode;

use bus_core::CoreError;
use bus_worker::WorkerError;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, CliError, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONFIG_ERROR: u8 = 3;
    pub const PIPELINE_FAILURE: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = cli.config.clone();
    let result = match cli.command {
        Commands::Worker(args) => commands::worker::execute(config, args).await,
        Commands::Submit(args) => commands::submit::execute(config, args).await,
        Commands::Status(args) => commands::status::execute(config, args).await,
        Commands::Run(args) => commands::run::execute(config, args).await,
        Commands::Stages(args) => commands::stages::execute(args),
        Commands::Memory(args) => commands::memory::execute(config, args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Install the tracing subscriber. Logs go to stderr so command output on
/// stdout stays machine readable.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "bus=debug,info" } else { "bus=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    // Ignore a subscriber that is already installed.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init();
}

/// Map an error chain to an exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return match cli {
                CliError::PipelineFailed { .. } => ExitCodes::PIPELINE_FAILURE,
                CliError::InvalidArgument(_) => ExitCodes::INVALID_ARGS,
            };
        }
        if let Some(worker) = cause.downcast_ref::<WorkerError>() {
            match worker {
                WorkerError::InvalidTask(_)
                | WorkerError::InvalidOptions(_)
                | WorkerError::JobNotFound(_) => return ExitCodes::INVALID_ARGS,
                WorkerError::Core(CoreError::Config(_)) => return ExitCodes::CONFIG_ERROR,
                _ => {}
            }
        }
        if let Some(CoreError::Config(_)) = cause.downcast_ref::<CoreError>() {
            return ExitCodes::CONFIG_ERROR;
        }
    }
    ExitCodes::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_categorize_error() {
        let config = anyhow::Error::new(CoreError::Config("bad".into()));
        assert_eq!(categorize_error(&config), ExitCodes::CONFIG_ERROR);

        let missing = anyhow::Error::new(WorkerError::JobNotFound(Uuid::nil()));
        assert_eq!(categorize_error(&missing), ExitCodes::INVALID_ARGS);

        let failed = anyhow::Error::new(CliError::PipelineFailed {
            job_id: Uuid::nil(),
            reason: "qa_testing: llm down".into(),
        });
        assert_eq!(categorize_error(&failed), ExitCodes::PIPELINE_FAILURE);

        let wrapped = anyhow::Error::new(CoreError::Config("bad".into())).context("loading settings");
        assert_eq!(categorize_error(&wrapped), ExitCodes::CONFIG_ERROR);

        assert_eq!(
            categorize_error(&anyhow::anyhow!("connection refused")),
            ExitCodes::GENERAL_ERROR
        );
    }
}
