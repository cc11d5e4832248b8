use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use verse_cli::commands::ledger::{self, LedgerCommand};

/// Verse authorship ledger.
#[derive(Parser, Debug)]
#[command(name = "verse", author = "Verse Contributors", version)]
struct Cli {
    /// Ledger configuration file (TOML); defaults to an in-memory ledger
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: LedgerCommand,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    ledger::run(cli.command, cli.config.as_deref())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
