//! `vex export` — dump a run's committed events to a JSON forensic bundle.
//!
//! Reads directly off the `Store` rather than the control API: export is an
//! operator forensics tool, not a live-proxy operation. The bundle's
//! `merkle_root` is a summary over all event hashes, using
//! `vex_core::merkle::MerkleTree` as documented — independent of the hash
//! chain itself, useful for a reviewer who wants one fingerprint for "did
//! this exact set of events get exported" without replaying the whole chain.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;
use vex_core::merkle::MerkleTree;
use vex_persist::{SqliteLedgerStore, Store};

/// Arguments for the export command.
#[derive(Args)]
pub struct ExportArgs {
    /// `sqlx` connection URL for the ledger store.
    #[arg(long, short = 'd', default_value = "sqlite://vex_gatekeeper.db")]
    database_url: String,

    /// Run to export; defaults to the most recently created run.
    #[arg(long)]
    run_id: Option<String>,

    /// Destination path for the JSON bundle; prints to stdout if omitted.
    #[arg(long, short = 'o')]
    out: Option<PathBuf>,
}

pub async fn run(args: ExportArgs) -> Result<()> {
    let store = SqliteLedgerStore::connect(&args.database_url)
        .await
        .with_context(|| format!("failed to open ledger store at {}", args.database_url))?;

    let run_id = match args.run_id {
        Some(id) => id,
        None => store
            .get_run_id()
            .await
            .context("failed to look up the active run")?
            .context("no run found in the ledger store")?,
    };

    let run = store
        .get_run(&run_id)
        .await
        .context("failed to load run metadata")?
        .with_context(|| format!("run {run_id} not found"))?;

    let last_seq = match store.last_event(&run_id).await.context("failed to find chain head")? {
        Some(last) => last.seq,
        None => {
            println!("{} run {run_id} has no committed events", "⚠".yellow().bold());
            return Ok(());
        }
    };

    let events = store
        .range(&run_id, 0, last_seq)
        .await
        .context("failed to read event range")?;

    let leaves: Vec<(String, vex_core::Hash)> = events.iter().map(|e| (e.id.to_hex(), e.hash)).collect();
    let tree = MerkleTree::from_leaves(leaves);

    let bundle = json!({
        "run_id": run.run_id,
        "agent_label": run.agent_label,
        "genesis_hash": run.genesis_hash.to_hex(),
        "key_ranges": run.key_ranges,
        "created_at": run.created_at,
        "event_count": events.len(),
        "merkle_root": tree.root_hash().map(|h| h.to_hex()),
        "events": events,
    });

    let pretty = serde_json::to_string_pretty(&bundle).context("failed to serialize forensic bundle")?;

    match args.out {
        Some(path) => {
            std::fs::write(&path, &pretty).with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{} exported {} events for run {} to {}",
                "✓".green().bold(),
                events.len(),
                run_id,
                path.display()
            );
        }
        None => println!("{pretty}"),
    }

    Ok(())
}
