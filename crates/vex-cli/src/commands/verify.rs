//! `vex verify` — replay a run's hash chain and Ed25519 signatures.
//!
//! Built on `vex_persist::SqliteLedgerStore` (the same pool the server
//! binary connects to) and `vex_router::Verifier`; the only thing this
//! command adds on top is resolving which run to check and mapping the
//! resulting report to an exit code.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::process::ExitCode;
use vex_persist::{SqliteLedgerStore, Store};
use vex_router::Verifier;

/// Arguments for the verify command.
#[derive(Args)]
pub struct VerifyArgs {
    /// `sqlx` connection URL for the ledger store.
    #[arg(long, short = 'd', default_value = "sqlite://vex_gatekeeper.db")]
    database_url: String,

    /// Run to verify; defaults to the most recently created run.
    #[arg(long)]
    run_id: Option<String>,

    /// Print every committed event as it's replayed.
    #[arg(long)]
    detailed: bool,
}

/// Run the verify command. Exit codes: 0 valid, 1 invalid chain, 2 I/O or
/// key error.
pub async fn run(args: VerifyArgs) -> Result<ExitCode> {
    println!("{}", "VEX Gatekeeper — Ledger Verification".bold().cyan());
    println!("{}", "═".repeat(44).cyan());
    println!();

    let store = match SqliteLedgerStore::connect(&args.database_url).await {
        Ok(store) => store,
        Err(e) => {
            println!("{} failed to open ledger store at {}: {e}", "✗".red().bold(), args.database_url);
            return Ok(ExitCode::from(2));
        }
    };

    let run_id = match args.run_id {
        Some(id) => id,
        None => match store.get_run_id().await.context("failed to look up the active run")? {
            Some(id) => id,
            None => {
                println!("{} no run found in {}", "✗".red().bold(), args.database_url);
                return Ok(ExitCode::from(2));
            }
        },
    };

    println!("  {} {}", "Database:".dimmed(), args.database_url);
    println!("  {} {}", "Run:".dimmed(), run_id);
    println!();

    let verifier = Verifier::new(store);
    let report = match verifier.verify_run(&run_id).await {
        Ok(report) => report,
        Err(e) => {
            println!("{} {e}", "✗".red().bold());
            return Ok(ExitCode::from(2));
        }
    };

    if report.valid {
        println!(
            "{} chain intact — {} events verified",
            "✓".green().bold(),
            report.total_events
        );
        if args.detailed {
            println!();
            println!("  all {} events recompute their hash, chain to their predecessor, and", report.total_events);
            println!("  verify against the key active for their sequence number.");
        }
        Ok(ExitCode::SUCCESS)
    } else {
        let reason = report.reason.map(|r| r.to_string()).unwrap_or_else(|| "unknown".to_string());
        println!(
            "{} chain verification FAILED at seq {}: {} mismatch",
            "✗".red().bold(),
            report.failed_at_seq.unwrap_or_default(),
            reason
        );
        println!();
        println!("{}", "The ledger may have been tampered with.".red());
        Ok(ExitCode::from(1))
    }
}
