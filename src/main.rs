//! Muster: layered agent registry and parallel task orchestrator.
//!
//! Main entry point for the `muster` CLI. Parses arguments, initializes
//! logging, dispatches to the command handler, and maps errors to exit
//! codes.

use muster::cli::Cli;
use muster::error::MusterError;
use muster::{commands, exit_codes, logging};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(err) = logging::init(&cli.log_level) {
        eprintln!("Warning: {}", err);
    }

    match commands::dispatch(cli.command) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            eprintln!("Error: {:#}", err);

            let code = err
                .downcast_ref::<MusterError>()
                .map(MusterError::exit_code)
                .unwrap_or(exit_codes::CONFIG_ERROR);
            ExitCode::from(code as u8)
        }
    }
}
