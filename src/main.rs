//! Main entry point for the flatarch CLI app

use flatarch::cli;
use flatarch::cli_runner::{self, Outcome};
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    let args = cli::run();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli_runner::run_cli_app(&args) {
        Ok(Outcome::Done) => std::process::ExitCode::SUCCESS,
        Ok(Outcome::NotFound) => std::process::ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
