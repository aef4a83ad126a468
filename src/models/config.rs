//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pagination and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Platform API endpoint settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Snapshot persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Drop guard applied before committing a snapshot
    #[serde(default)]
    pub guard: GuardConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.page_timeout_secs == 0 {
            return Err(AppError::validation("crawler.page_timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.api.timeout_secs == 0 {
            return Err(AppError::validation("api.timeout_secs must be > 0"));
        }
        if self.api.token_env.trim().is_empty() {
            return Err(AppError::validation("api.token_env is empty"));
        }
        url::Url::parse(&self.api.base_url)
            .map_err(|e| AppError::validation(format!("api.base_url is invalid: {e}")))?;
        if self.guard.max_drop_percent > 100 {
            return Err(AppError::validation("guard.max_drop_percent must be <= 100"));
        }
        Ok(())
    }
}

/// Pagination and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Delay between page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Upper bound on a single page request
    #[serde(default = "defaults::page_timeout")]
    pub page_timeout_secs: u64,

    /// Maximum accounts crawled at the same time
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Complete a failed direction from the previous snapshot.
    ///
    /// Off by default: a list cut short by a failed page is kept as fetched
    /// and its removals are reported as unreliable.
    #[serde(default = "defaults::merge_on_error")]
    pub merge_on_error: bool,
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            request_delay_ms: defaults::request_delay(),
            page_timeout_secs: defaults::page_timeout(),
            max_concurrent: defaults::max_concurrent(),
            merge_on_error: defaults::merge_on_error(),
        }
    }
}

/// Platform API endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the platform REST API
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Environment variable holding the bearer token
    #[serde(default = "defaults::token_env")]
    pub token_env: String,

    /// HTTP client timeout in seconds
    #[serde(default = "defaults::api_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            token_env: defaults::token_env(),
            timeout_secs: defaults::api_timeout(),
        }
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Number of snapshots kept per account (0 keeps everything)
    #[serde(default)]
    pub keep_snapshots: usize,
}

/// Drop guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "defaults::guard_enabled")]
    pub enabled: bool,

    /// Maximum allowed drop percentage (0-100)
    #[serde(default = "defaults::max_drop_percent")]
    pub max_drop_percent: u8,

    /// Below this previous count the check is skipped
    #[serde(default = "defaults::min_baseline")]
    pub min_baseline: usize,

    /// Allow empty results when previous was also empty
    #[serde(default = "defaults::allow_cold_start")]
    pub allow_cold_start: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::guard_enabled(),
            max_drop_percent: defaults::max_drop_percent(),
            min_baseline: defaults::min_baseline(),
            allow_cold_start: defaults::allow_cold_start(),
        }
    }
}

mod defaults {
    // Crawler defaults
    pub fn user_agent() -> String {
        "graph-crawler/0.1".into()
    }
    pub fn request_delay() -> u64 {
        1500
    }
    pub fn page_timeout() -> u64 {
        30
    }
    pub fn max_concurrent() -> usize {
        2
    }
    pub fn merge_on_error() -> bool {
        false
    }

    // API defaults
    pub fn base_url() -> String {
        "https://api.example.com/2".into()
    }
    pub fn token_env() -> String {
        "GRAPH_API_TOKEN".into()
    }
    pub fn api_timeout() -> u64 {
        30
    }

    // Guard defaults
    pub fn guard_enabled() -> bool {
        true
    }
    pub fn max_drop_percent() -> u8 {
        20
    }
    pub fn min_baseline() -> usize {
        10
    }
    pub fn allow_cold_start() -> bool {
        true
    }
}
