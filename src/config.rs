// ABOUTME: Client configuration: service endpoint, polling cadence and output location
// ABOUTME: Layered as defaults, then an optional TOML file, then AUDILY_* environment variables

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jobs::poll::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::jobs::{ControllerSettings, PollSettings};
use crate::remote::DEFAULT_REQUEST_TIMEOUT;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub poll_interval: Duration,
    /// `0` means poll until the backend reports a terminal status.
    pub max_poll_attempts: u32,
    pub request_timeout: Duration,
    pub output_dir: PathBuf,
    pub user_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            output_dir: PathBuf::from("."),
            user_id: None,
        }
    }
}

/// Shape of the optional TOML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    poll_interval_secs: Option<u64>,
    max_polls: Option<u32>,
    request_timeout_secs: Option<u64>,
    output_dir: Option<PathBuf>,
    user_id: Option<String>,
}

impl ClientConfig {
    /// Loads `.env`, the TOML file at `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml_str(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(raw).context("Failed to parse TOML")?;
        let mut config = Self::default();

        if let Some(url) = file.api_url {
            config.api_base_url = url;
        }
        if let Some(secs) = file.poll_interval_secs {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(max) = file.max_polls {
            config.max_poll_attempts = max;
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = file.output_dir {
            config.output_dir = dir;
        }
        if file.user_id.is_some() {
            config.user_id = file.user_id;
        }

        Ok(config)
    }

    /// Overrides fields from `AUDILY_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("AUDILY_API_URL") {
            self.api_base_url = url;
        }
        if let Some(secs) = lookup("AUDILY_POLL_INTERVAL_SECS") {
            self.poll_interval = Duration::from_secs(
                secs.trim()
                    .parse()
                    .context("AUDILY_POLL_INTERVAL_SECS must be a whole number of seconds")?,
            );
        }
        if let Some(max) = lookup("AUDILY_MAX_POLLS") {
            self.max_poll_attempts = max
                .trim()
                .parse()
                .context("AUDILY_MAX_POLLS must be a non-negative integer")?;
        }
        if let Some(secs) = lookup("AUDILY_REQUEST_TIMEOUT_SECS") {
            self.request_timeout = Duration::from_secs(
                secs.trim()
                    .parse()
                    .context("AUDILY_REQUEST_TIMEOUT_SECS must be a whole number of seconds")?,
            );
        }
        if let Some(dir) = lookup("AUDILY_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(user) = lookup("AUDILY_USER_ID") {
            self.user_id = Some(user);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "API URL must start with http:// or https://, got '{}'",
                self.api_base_url
            );
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("Poll interval must be at least one second");
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("Request timeout must be at least one second");
        }
        Ok(())
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            poll: PollSettings {
                interval: self.poll_interval,
                max_attempts: self.max_poll_attempts,
            },
        }
    }
}
