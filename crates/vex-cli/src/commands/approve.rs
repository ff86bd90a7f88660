//! `vex approve` — signal approval for a stalled action via the control
//! API's `POST /api/approve/{event_id}`.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

/// Arguments for the approve command.
#[derive(Args)]
pub struct ApproveArgs {
    /// Hex-encoded `event_id` of the `blocked` event to approve.
    event_id: String,

    /// Base URL of the control API's localhost listener.
    #[arg(long, default_value = "http://127.0.0.1:8089")]
    control_url: String,
}

pub async fn run(args: ApproveArgs) -> Result<()> {
    let url = format!("{}/api/approve/{}", args.control_url.trim_end_matches('/'), args.event_id);
    let resp = reqwest::Client::new()
        .post(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach control API at {url}"))?;

    match resp.status().as_u16() {
        200 => {
            println!("{} approved {}", "✓".green().bold(), args.event_id);
            Ok(())
        }
        404 => bail!("{} is not a pending stall (404)", args.event_id),
        409 => bail!("{} was already signaled (409)", args.event_id),
        other => bail!("control API returned unexpected status {other}"),
    }
}
