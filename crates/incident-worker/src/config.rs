use anyhow::{Context, Result};
use clap::Parser;
use incident_coordination::IncidentConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line flags. Each one, when given, beats both the config file
/// and the `INCIDENT_*` environment.
#[derive(Debug, Parser)]
#[command(
    name = "incident-worker",
    version,
    about = "Hosts incident lifecycles, driven by JSON lines on stdin"
)]
pub struct Args {
    /// TOML config file
    #[arg(long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Directory for per-service event logs (in-memory if unset)
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Seconds an OPEN incident waits before each escalation
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub escalation_secs: Option<u64>,

    /// Webhook receiving notifications (log channel if unset)
    #[arg(long, value_name = "URL")]
    pub webhook_url: Option<String>,
}

impl Args {
    /// Build the effective config: defaults, file, environment, flags.
    pub fn resolve(&self) -> Result<IncidentConfig> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    fn resolve_with<F>(&self, lookup: F) -> Result<IncidentConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.config {
            Some(path) => IncidentConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => IncidentConfig::default(),
        };
        config
            .apply_env(lookup)
            .context("Invalid INCIDENT_* environment variable")?;

        if let Some(dir) = &self.state_dir {
            config.state_dir = Some(dir.clone());
        }
        if let Some(secs) = self.escalation_secs {
            config.escalation_interval = Duration::from_secs(secs);
        }
        if let Some(url) = &self.webhook_url {
            config.webhook_url = Some(url.clone()).filter(|u| !u.is_empty());
        }
        Ok(config)
    }
}
