mod commands;

use std::io;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use tracing::debug;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogMode {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl From<LogMode> for logutil::LogFormat {
    fn from(mode: LogMode) -> Self {
        match mode {
            LogMode::Pretty => logutil::LogFormat::HumanReadable,
            LogMode::Json => logutil::LogFormat::Json,
            LogMode::Compact => logutil::LogFormat::Compact,
        }
    }
}

#[derive(Parser)]
#[clap(name = "lazydist")]
#[clap(version)]
#[clap(about = "Run computations on a group of worker processes", long_about = None)]
struct Cli {
    /// Log verbosity.
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format.
    #[clap(long, value_enum)]
    log_mode: Option<LogMode>,

    #[clap(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Workers pick their level from the coordinator and must keep stdout
    // free for frames.
    let verbosity = match &cli.command {
        Commands::Worker => commands::worker_verbosity().max(cli.verbose),
        _ => cli.verbose,
    };
    logutil::configure_global_logger(
        logutil::verbosity_to_level(verbosity),
        cli.log_mode.unwrap_or_default().into(),
        io::stderr,
    );

    debug!(version = env!("CARGO_PKG_VERSION"), "starting...");

    cli.command.run(cli.verbose)
}
