//! `vex` — the VEX Gatekeeper's operator CLI.
//!
//! # Usage
//!
//! ```bash
//! # Verify a run's hash chain
//! vex verify --database-url sqlite://vex_gatekeeper.db
//!
//! # Approve or reject a stalled action
//! vex approve 3f9a1c2b4d5e6f70
//! vex reject 3f9a1c2b4d5e6f70
//!
//! # Export a run's events as a forensic bundle
//! vex export --database-url sqlite://vex_gatekeeper.db --out run.json
//!
//! # Show version and configuration
//! vex info
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;

use commands::{approve, export, info, reject, verify};

/// Operator CLI for the VEX Gatekeeper.
///
/// Reads the gatekeeper's signed, hash-chained ledger to verify integrity,
/// signals approval or rejection of a stalled action via the control API,
/// and exports forensic bundles.
#[derive(Parser)]
#[command(
    name = "vex",
    version,
    about = "Operator CLI for the VEX Gatekeeper",
    long_about = "Reads the gatekeeper's signed, hash-chained ledger to verify integrity,\n\
                  signals approval or rejection of a stalled action, and exports\n\
                  forensic bundles."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the ledger's hash chain and report whether it is intact
    #[command(name = "verify")]
    Verify(verify::VerifyArgs),

    /// Signal approval for a stalled action
    #[command(name = "approve")]
    Approve(approve::ApproveArgs),

    /// Signal rejection for a stalled action
    #[command(name = "reject")]
    Reject(reject::RejectArgs),

    /// Dump a run's events to a JSON forensic bundle
    #[command(name = "export")]
    Export(export::ExportArgs),

    /// Show CLI and workspace version information
    #[command(name = "info")]
    Info(info::InfoArgs),
}

#[tokio::main]
async fn main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    setup_logging(cli.verbose);

    // Execute command
    match cli.command {
        Commands::Verify(args) => verify::run(args).await,
        Commands::Approve(args) => {
            approve::run(args).await?;
            Ok(std::process::ExitCode::SUCCESS)
        }
        Commands::Reject(args) => {
            reject::run(args).await?;
            Ok(std::process::ExitCode::SUCCESS)
        }
        Commands::Export(args) => {
            export::run(args).await?;
            Ok(std::process::ExitCode::SUCCESS)
        }
        Commands::Info(args) => {
            info::run(args)?;
            Ok(std::process::ExitCode::SUCCESS)
        }
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(filter))
        )
        .init();
}

/// Print a success message with a checkmark
#[allow(dead_code)]
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message with an X
#[allow(dead_code)]
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print a warning message
#[allow(dead_code)]
pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

/// Print an info message
#[allow(dead_code)]
pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}
