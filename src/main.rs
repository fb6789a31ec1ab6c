use std::process::ExitCode;

use clap::Parser;

use garmentfe::cli::{self, CliArgs};
use garmentfe::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init(args.verbose);
    if let Some(path) = logger::log_path() {
        tracing::debug!("session log at {}", path.display());
    }

    cli::run(args)
}
