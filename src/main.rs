// uesearch CLI - starts one service instance for one workspace.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use uesearch::config::Config;
use uesearch::init_logging_with_level;

#[derive(Parser)]
#[command(
    name = "uesearch",
    about = "Per-workspace code search service for Unreal Engine source trees",
    version
)]
struct Cli {
    /// Path to the workspace config JSON
    #[arg(env = "UESEARCH_CONFIG")]
    config: PathBuf,

    /// Show debug logging
    #[arg(long)]
    verbose: bool,

    /// Only log errors
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = init_logging_with_level(cli.verbose, cli.quiet);

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    match uesearch::run_service(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}
