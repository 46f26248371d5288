//! The main entry point for the kiln CLI.

#![warn(missing_docs)]

use std::process::ExitCode;

use clap::Parser;
use kiln::cli::{self, Args};

//================================================================================================
// Functions
//================================================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_from(cli::change_directory());

    cli::init_global_subscriber(args.log);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Ctrl+C received, terminating...");
            ExitCode::SUCCESS
        }
        res = cli::run(args) => {
            if let Err(e) = res {
                kiln::fatal!(e);
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    }
}
