use clap::Parser;
use std::process::ExitCode;

use realtime_sim::{app, cli::Cli, logging};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);
    match app::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "exiting");
            ExitCode::FAILURE
        }
    }
}
