//! Incident runtime configuration
//!
//! Values come from three layers, later layers winning:
//!
//! 1. [`IncidentConfig::default`]
//! 2. an optional TOML file ([`IncidentConfig::from_toml_file`])
//! 3. `INCIDENT_*` environment variables ([`IncidentConfig::apply_env`])
//!
//! ```toml
//! escalation_secs = 30
//! state_dir = "/var/lib/incidents"
//! webhook_url = "https://hooks.example.com/incidents"
//!
//! [retry]
//! initial_interval_ms = 1000
//! backoff_coefficient = 2.0
//! maximum_interval_ms = 60000
//! maximum_attempts = 5
//! attempt_timeout_ms = 30000
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::events::LogStore;
use crate::notify::{LogChannel, NotifyChannel, RetryPolicy, RetryingDispatcher, WebhookChannel};

/// Environment variable for the event log directory
pub const ENV_STATE_DIR: &str = "INCIDENT_STATE_DIR";
/// Environment variable for the escalation interval in seconds
pub const ENV_ESCALATION_SECS: &str = "INCIDENT_ESCALATION_SECS";
/// Environment variable for the webhook URL
pub const ENV_WEBHOOK_URL: &str = "INCIDENT_WEBHOOK_URL";
/// Environment variable for the notification attempt limit
pub const ENV_NOTIFY_MAX_ATTEMPTS: &str = "INCIDENT_NOTIFY_MAX_ATTEMPTS";

/// Default wait before an unacknowledged incident escalates
pub const DEFAULT_ESCALATION_INTERVAL: Duration = Duration::from_secs(30);

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Configuration for the incident registry and its dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentConfig {
    /// Wait before each escalation of an OPEN incident
    pub escalation_interval: Duration,
    /// Directory for per-service event logs; `None` keeps logs in memory
    pub state_dir: Option<PathBuf>,
    /// Webhook endpoint; `None` routes notifications to the log
    pub webhook_url: Option<String>,
    /// Notification retry policy
    pub retry: RetryPolicy,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            escalation_interval: DEFAULT_ESCALATION_INTERVAL,
            state_dir: None,
            webhook_url: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// On-disk shape of the TOML file; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    escalation_secs: Option<u64>,
    state_dir: Option<PathBuf>,
    webhook_url: Option<String>,
    #[serde(default)]
    retry: FileRetry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRetry {
    initial_interval_ms: Option<u64>,
    backoff_coefficient: Option<f64>,
    maximum_interval_ms: Option<u64>,
    maximum_attempts: Option<u32>,
    attempt_timeout_ms: Option<u64>,
}

impl IncidentConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(path = %path.display(), "Loaded incident config file");
        Ok(config)
    }

    /// Defaults overlaid with TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;

        let mut config = Self::default();
        if let Some(secs) = file.escalation_secs {
            config.escalation_interval = escalation_interval(secs, "escalation_secs")?;
        }
        if let Some(dir) = file.state_dir {
            config.state_dir = Some(dir);
        }
        config.webhook_url = file.webhook_url.filter(|u| !u.is_empty());

        let retry = &mut config.retry;
        if let Some(ms) = file.retry.initial_interval_ms {
            retry.initial_interval = Duration::from_millis(ms);
        }
        if let Some(coefficient) = file.retry.backoff_coefficient {
            if !coefficient.is_finite() || coefficient < 1.0 {
                return Err(ConfigError::invalid(
                    "retry.backoff_coefficient",
                    "must be a finite number >= 1.0",
                ));
            }
            retry.backoff_coefficient = coefficient;
        }
        if let Some(ms) = file.retry.maximum_interval_ms {
            retry.maximum_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = file.retry.maximum_attempts {
            retry.maximum_attempts = max_attempts(attempts, "retry.maximum_attempts")?;
        }
        if let Some(ms) = file.retry.attempt_timeout_ms {
            retry.attempt_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Overlay `INCIDENT_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_STATE_DIR).filter(|d| !d.is_empty()) {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = lookup(ENV_ESCALATION_SECS) {
            let secs = secs.trim().parse::<u64>().map_err(|e| {
                ConfigError::invalid(ENV_ESCALATION_SECS, e.to_string())
            })?;
            self.escalation_interval = escalation_interval(secs, ENV_ESCALATION_SECS)?;
        }
        if let Some(url) = lookup(ENV_WEBHOOK_URL).filter(|u| !u.is_empty()) {
            self.webhook_url = Some(url);
        }
        if let Some(attempts) = lookup(ENV_NOTIFY_MAX_ATTEMPTS) {
            let attempts = attempts.trim().parse::<u32>().map_err(|e| {
                ConfigError::invalid(ENV_NOTIFY_MAX_ATTEMPTS, e.to_string())
            })?;
            self.retry.maximum_attempts = max_attempts(attempts, ENV_NOTIFY_MAX_ATTEMPTS)?;
        }
        Ok(())
    }

    /// Where event logs are kept.
    pub fn log_store(&self) -> LogStore {
        match &self.state_dir {
            Some(dir) => LogStore::Directory(dir.clone()),
            None => LogStore::Memory,
        }
    }

    /// Notification transport selected by this config.
    pub fn channel(&self) -> Arc<dyn NotifyChannel> {
        match &self.webhook_url {
            Some(url) => Arc::new(WebhookChannel::new(url.clone())),
            None => Arc::new(LogChannel::new()),
        }
    }

    /// Dispatcher over [`Self::channel`] with the configured retry policy.
    pub fn dispatcher(&self) -> RetryingDispatcher {
        RetryingDispatcher::new(self.channel(), self.retry.clone())
    }
}

fn escalation_interval(secs: u64, key: &str) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::invalid(key, "escalation interval must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

fn max_attempts(attempts: u32, key: &str) -> Result<u32, ConfigError> {
    if attempts == 0 {
        return Err(ConfigError::invalid(key, "at least one attempt is required"));
    }
    Ok(attempts)
}
