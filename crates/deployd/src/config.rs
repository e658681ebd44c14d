//! deployd.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use deployd_locket::{DEFAULT_LOCK_KEY, LockSettings, LocketConfig};
use deployd_updater::UpdaterOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct DeploydConfig {
    /// Directory holding `deployd.redb`.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub deployment_updater: UpdaterConfig,
    /// Absent means the scheduler runs without a cluster lock.
    pub locket: Option<LocketConfig>,
    pub instances_reporter: ReporterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub update_frequency_in_seconds: u64,
    pub lock_owner: String,
    pub lock_key: String,
    pub lock_ttl_in_seconds: u64,
    pub lock_retry_interval_in_seconds: u64,
    pub stop_non_web_processes: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            update_frequency_in_seconds: 5,
            lock_owner: default_lock_owner(),
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            lock_ttl_in_seconds: 15,
            lock_retry_interval_in_seconds: 1,
            stop_non_web_processes: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    /// Base URL of the scheduler backend, e.g. `http://bbs.internal:8080`.
    pub url: String,
    #[serde(default = "default_reporter_timeout")]
    pub timeout_in_seconds: u64,
}

fn default_reporter_timeout() -> u64 {
    5
}

fn default_lock_owner() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("deployd-{}", std::process::id()))
}

impl DeploydConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DeploydConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let updater = &self.deployment_updater;
        if updater.update_frequency_in_seconds == 0 {
            bail!("deployment_updater.update_frequency_in_seconds must be greater than 0");
        }
        if updater.lock_retry_interval_in_seconds == 0 {
            bail!("deployment_updater.lock_retry_interval_in_seconds must be greater than 0");
        }
        if updater.lock_ttl_in_seconds <= updater.lock_retry_interval_in_seconds {
            bail!(
                "deployment_updater.lock_ttl_in_seconds ({}) must be greater than lock_retry_interval_in_seconds ({})",
                updater.lock_ttl_in_seconds,
                updater.lock_retry_interval_in_seconds
            );
        }
        if i64::try_from(updater.lock_ttl_in_seconds).is_err() {
            bail!(
                "deployment_updater.lock_ttl_in_seconds ({}) is out of range",
                updater.lock_ttl_in_seconds
            );
        }
        if updater.lock_owner.trim().is_empty() {
            bail!("deployment_updater.lock_owner must not be empty");
        }
        if self.instances_reporter.timeout_in_seconds == 0 {
            bail!("instances_reporter.timeout_in_seconds must be greater than 0");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("deployd.redb")
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.deployment_updater.update_frequency_in_seconds)
    }

    pub fn reporter_timeout(&self) -> Duration {
        Duration::from_secs(self.instances_reporter.timeout_in_seconds)
    }

    pub fn lock_settings(&self) -> LockSettings {
        let updater = &self.deployment_updater;
        let mut settings = LockSettings::new(&updater.lock_owner);
        settings.key = updater.lock_key.clone();
        settings.ttl = Duration::from_secs(updater.lock_ttl_in_seconds);
        settings.retry_interval = Duration::from_secs(updater.lock_retry_interval_in_seconds);
        settings
    }

    pub fn updater_options(&self) -> UpdaterOptions {
        UpdaterOptions {
            stop_non_web_processes: self.deployment_updater.stop_non_web_processes,
        }
    }
}
