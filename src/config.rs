use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::remote::RetryPolicy;

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for study-sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Directory holding the local state and drafts
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
    /// Remote sync endpoint; sync is disabled without one
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Bearer token sent to the remote sync endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Catalog used when no repo source is enabled
    #[serde(default = "defaults::builtin_catalog_url")]
    pub builtin_catalog_url: String,
    /// Quiet window before local edits are pushed
    #[serde(default = "defaults::debounce_ms")]
    pub debounce_ms: u64,
    /// Deadline for a single HTTP request
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "defaults::max_network_retries")]
    pub max_network_retries: u32,
    #[serde(default = "defaults::retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
            remote_url: None,
            auth_token: None,
            builtin_catalog_url: defaults::builtin_catalog_url(),
            debounce_ms: defaults::debounce_ms(),
            request_timeout_secs: defaults::request_timeout_secs(),
            max_network_retries: defaults::max_network_retries(),
            retry_base_delay_ms: defaults::retry_base_delay_ms(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the config file (if any) and environment
    /// variables
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        tracing::debug!("loading study-sync config from {:?}", config_path);
        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            tracing::debug!("no config file, using defaults");
            Self::default()
        };

        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(path) = env::var("STUDY_SYNC_DATA_DIR") {
            self.data_dir = expand_tilde(&PathBuf::from(path));
        }

        if let Ok(url) = env::var("STUDY_SYNC_REMOTE_URL") {
            self.remote_url = Some(url).filter(|u| !u.is_empty());
        }

        if let Ok(token) = env::var("STUDY_SYNC_TOKEN") {
            self.auth_token = Some(token).filter(|t| !t.is_empty());
        }

        if let Ok(debounce) = env::var("STUDY_SYNC_DEBOUNCE_MS") {
            self.debounce_ms = debounce
                .parse()
                .context("Failed to parse STUDY_SYNC_DEBOUNCE_MS as u64")?;
        }

        if let Ok(timeout) = env::var("STUDY_SYNC_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = timeout
                .parse()
                .context("Failed to parse STUDY_SYNC_REQUEST_TIMEOUT_SECS as u64")?;
        }
        Ok(self)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: SyncConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.data_dir = expand_tilde(&config.data_dir);

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/study-sync/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    /// Get data directory, creating it if necessary
    pub fn ensure_data_dir(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        Ok(self.data_dir.clone())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_network_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            timeout: self.request_timeout(),
            ..RetryPolicy::default()
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("study-sync"))
            .unwrap_or_else(|| PathBuf::from(".study-sync"))
    }

    pub(crate) fn builtin_catalog_url() -> String {
        "https://catalog.study-sync.dev/builtin".to_string()
    }

    pub(crate) fn debounce_ms() -> u64 {
        2000
    }

    pub(crate) fn request_timeout_secs() -> u64 {
        15
    }

    pub(crate) fn max_network_retries() -> u32 {
        3
    }

    pub(crate) fn retry_base_delay_ms() -> u64 {
        500
    }
}
