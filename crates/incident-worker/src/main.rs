mod config;
mod intake;

use anyhow::{Context, Result};
use clap::Parser;
use config::Args;
use incident_coordination::IncidentRegistry;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "incident_coordination=info,incident_worker=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.resolve()?;
    info!(
        escalation_secs = config.escalation_interval.as_secs(),
        state_dir = ?config.state_dir,
        webhook = config.webhook_url.is_some(),
        "Incident worker starting"
    );

    let registry = IncidentRegistry::new(config);
    let resumed = registry
        .recover()
        .await
        .context("Failed to recover incidents from state directory")?;
    if !resumed.is_empty() {
        info!(services = ?resumed, "Resumed unresolved incidents");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = intake::handle_line(&registry, &line).await;
        let mut out = serde_json::to_vec(&reply).context("Failed to encode reply")?;
        out.push(b'\n');
        stdout.write_all(&out).await.context("Failed to write reply")?;
        stdout.flush().await.context("Failed to write reply")?;
    }

    info!(
        live = registry.live_services().await.len(),
        "Input closed, incident worker stopping"
    );
    Ok(())
}
