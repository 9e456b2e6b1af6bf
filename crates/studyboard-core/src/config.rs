//! Store configuration, loadable from a YAML file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StudyboardError};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Configuration for the synchronization store and its backend client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend API root; `/studies` is appended to it.
    pub base_url: String,
    /// Refresh period for studies with unfinished trials (default: 10000)
    pub poll_interval_ms: u64,
    /// Per-request timeout (default: 10000)
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval_ms: 10_000,
            request_timeout_ms: 10_000,
            user_agent: format!("studyboard/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Loads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(StudyboardError::InvalidConfig("base_url is empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StudyboardError::InvalidConfig(format!(
                "base_url must be an http(s) URL, got '{url}'"
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(StudyboardError::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(StudyboardError::InvalidConfig(
                "request_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
