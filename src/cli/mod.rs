//! The clap-derive command line surface.

mod commands;
pub mod logging;
mod store;

use std::path::PathBuf;

use clap::Parser;
pub use commands::run;
pub use logging::init_global_subscriber;

/// Top-level command line arguments.
#[derive(Parser)]
#[command(name = "kiln", author, version, about, long_about = None)]
pub struct Args {
    /// Run as if started in this directory
    ///
    /// Applied before anything else, so every relative path on the
    /// command line (lockfiles, patterns, configuration) resolves
    /// against it.
    #[arg(short = 'C', value_name = "DIR", global = true, value_parser = canonical_dir)]
    working_directory: Option<PathBuf>,

    /// Logging verbosity flags.
    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    command: commands::Commands,
}

/// Verbosity flags shared by every subcommand.
#[derive(Parser, Clone, Copy, Debug)]
#[command(next_help_heading = "Log Options")]
pub struct LogArgs {
    /// Increase logging verbosity
    ///
    /// Repeatable: `-v` enables DEBUG, `-vv` enables TRACE. The default
    /// level is INFO. The `RUST_LOG` environment variable, when set,
    /// takes precedence over this flag.
    ///
    /// Silently ignored when `--quiet` is also given.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbosity: u8,

    /// Decrease logging verbosity (takes precedence)
    ///
    /// Repeatable: `-q` limits output to WARN, `-qq` to ERROR. Overrides
    /// both `--verbosity` and `RUST_LOG`; intended for scripted and CI
    /// invocations that only care about failures.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,
}

fn canonical_dir(path: &str) -> Result<PathBuf, std::io::Error> {
    std::fs::canonicalize(path)
}

/// Applies a leading `-C <dir>` before clap parsing so every relative
/// path on the command line resolves against it.
pub fn change_directory() -> Vec<String> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|a| a == "-C") {
        if let Some(dir) = args.get(pos + 1) {
            std::env::set_current_dir(dir).ok();
        }
    }
    args
}
