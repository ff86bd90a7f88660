//! `vex info` — show CLI and workspace version information.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Arguments for the info command.
#[derive(Args)]
pub struct InfoArgs;

/// Run the info command.
pub fn run(_args: InfoArgs) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    println!("{}", "VEX Gatekeeper".bold().cyan());
    println!("{}", "═".repeat(40).cyan());
    println!();

    println!("{}", "Version:".bold());
    println!("  {} {}", "vex (CLI):".dimmed(), version.green());
    println!("  {} {}", "vex-core:".dimmed(), version.green());
    println!("  {} {}", "vex-persist:".dimmed(), version.green());
    println!("  {} {}", "vex-queue:".dimmed(), version.green());
    println!("  {} {}", "vex-router:".dimmed(), version.green());
    println!();

    println!("{}", "Subcommands:".bold());
    println!("  {} replay a run's hash chain and report whether it's intact", "verify".green());
    println!("  {} signal approval for a stalled action", "approve <event_id>".green());
    println!("  {} signal rejection for a stalled action", "reject <event_id>".green());
    println!("  {} dump a run's events to a JSON forensic bundle", "export".green());
    println!();

    println!("{}", "Configuration:".bold());
    println!(
        "  {} layered from defaults, an optional TOML file, and VEX_GATEKEEPER_* env vars",
        "ℹ".blue()
    );
    println!();

    println!("{}", "Links:".bold());
    println!("  {} {}", "Repository:".dimmed(), "https://github.com/provnai/vex".underline());

    Ok(())
}
