//! Andworx command line
//!
//! Builds, cleans and inspects Android projects.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use andworx::commands::{self, BuildCommand, CleanCommand, StatusCommand};
use andworx::core::{BuildError, BuilderConfig, APP_NAME, VERSION};

#[derive(Parser)]
#[command(name = "andworx", version, about = "Incremental Android build pipeline")]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Builder configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a project, re-running only the stages that need it
    Build {
        /// Project root
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Ignore previous state and rebuild everything
        #[arg(long)]
        full: bool,
    },
    /// Remove intermediates and persisted build state
    Clean {
        #[arg(default_value = ".")]
        project: PathBuf,
    },
    /// Show which stages are due on the next build
    Status {
        #[arg(default_value = ".")]
        project: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("ANDWORX_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!("{} v{}", APP_NAME, VERSION);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            match e.downcast_ref::<BuildError>() {
                Some(build) => error!("{}", build.user_message()),
                None => error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

/// Run the selected command; `Ok(false)` means the build did not succeed
async fn run(cli: Cli) -> Result<bool> {
    let config = BuilderConfig::load(cli.config.as_deref()).await?;

    match cli.command {
        Command::Build { project, full } => {
            let outcome = BuildCommand {
                project_path: project,
                full,
            }
            .execute(config)
            .await?;
            commands::report(&outcome);
            Ok(outcome.is_success())
        }
        Command::Clean { project } => {
            CleanCommand {
                project_path: project,
            }
            .execute(&config)?;
            Ok(true)
        }
        Command::Status { project } => {
            StatusCommand {
                project_path: project,
            }
            .execute(&config)?;
            Ok(true)
        }
    }
}
