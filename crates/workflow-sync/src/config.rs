//! Sync configuration storage
//!
//! Handles persistent storage of the GitHub target and tracker tuning.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::constants::{defaults, github};

/// Repository the pipeline files are deployed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// REST API root (GitHub Enterprise uses `https://host/api/v3`)
    pub api_base_url: String,
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Branch pipeline files are committed to and runs are dispatched on
    pub branch: String,
    /// Personal access token; `GITHUB_TOKEN` takes precedence when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base_url: github::API_BASE_URL.to_string(),
            owner: String::new(),
            repo: String::new(),
            branch: defaults::BRANCH.to_string(),
            token: None,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl GitHubConfig {
    /// Token from the environment, falling back to the stored one
    pub fn resolved_token(&self) -> Option<String> {
        std::env::var(github::TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.token.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether owner and repo are both set
    pub fn has_target(&self) -> bool {
        !self.owner.trim().is_empty() && !self.repo.trim().is_empty()
    }
}

/// Polling behavior of the execution tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay between successful polls
    pub poll_interval_ms: u64,
    /// Consecutive failures before tracking is reported degraded
    pub failure_threshold: u32,
    /// First retry delay after a failure
    pub backoff_base_ms: u64,
    /// Upper bound on the retry delay
    pub backoff_max_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            failure_threshold: defaults::FAILURE_THRESHOLD,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_max_ms: defaults::BACKOFF_MAX_MS,
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry delay after `failures` consecutive failures (1-based)
    ///
    /// `min(base * 2^(failures - 1), max)`
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }
}

/// Full sync configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

impl SyncConfig {
    /// Load configuration from disk, or defaults if the file does not exist
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await.map_err(ConfigError::Io)?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration to disk
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(ConfigError::Io)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(path, contents).await.map_err(ConfigError::Io)?;

        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = TrackerConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(8_000));
        assert_eq!(config.backoff_delay(6), Duration::from_millis(30_000));
        assert_eq!(config.backoff_delay(500), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_load_missing_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.github.api_base_url, "https://api.github.com");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flowctl.json");

        let mut config = SyncConfig::default();
        config.github.owner = "acme".to_string();
        config.github.repo = "site".to_string();
        config.tracker.failure_threshold = 5;
        config.save(&path).await.unwrap();

        let loaded = SyncConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.github.has_target());
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        tokio::fs::write(&path, r#"{"github": {"owner": "acme", "repo": "site"}}"#)
            .await
            .unwrap();

        let loaded = SyncConfig::load(&path).await.unwrap();
        assert_eq!(loaded.github.branch, "main");
        assert_eq!(loaded.tracker, TrackerConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = SyncConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
