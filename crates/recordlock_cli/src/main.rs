//! recordlock CLI
//!
//! Command-line tools for exercising the recordlock coordinator.
//!
//! # Commands
//!
//! - `simulate` - Run contending workers against a shared record
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// recordlock command-line tools.
#[derive(Parser)]
#[command(name = "recordlock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run contending workers against one record in the in-memory engine
    Simulate {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Rounds per worker
        #[arg(short, long, default_value = "100")]
        rounds: usize,

        /// Milliseconds each granted lock is held
        #[arg(long, default_value = "1")]
        hold_ms: u64,

        /// Lock timeout in milliseconds (0 disables; default from RECORDLOCK_LOCK_TIMEOUT_MS)
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Isolation level (read_committed, repeatable_read, serializable)
        #[arg(short, long)]
        isolation: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            workers,
            rounds,
            hold_ms,
            timeout_ms,
            isolation,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                workers,
                rounds,
                hold: Duration::from_millis(hold_ms),
                timeout_ms,
                isolation,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Version => {
            println!("recordlock CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("recordlock Core v{}", recordlock_core::VERSION);
        }
    }

    Ok(())
}
