//! Configuration loading for the activity sync service.
//!
//! Configuration is loaded from a TOML file (default: `activity-sync.toml`).
//! Every field has a default, so a partial file or no file at all is valid.

use crate::retry::RetryPolicy;
use crate::wallet::sync::SyncConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `upstream.api_key`.
pub const API_KEY_ENV: &str = "UPSTREAM_API_KEY";

/// Largest page size the indexer accepts.
const MAX_UPSTREAM_PAGE_SIZE: u32 = 200;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub client: ClientConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Upstream indexer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the indexer API.
    #[serde(default = "default_upstream_url")]
    pub base_url: String,
    /// API key sent as `x-api-key`. `UPSTREAM_API_KEY` takes precedence.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Chain to query account activity on.
    #[serde(default = "default_chain")]
    pub chain: String,
    /// Events requested per page (clamped to 1..=200).
    #[serde(default = "default_upstream_page_size")]
    pub page_size: u32,
    /// Event types requested from the indexer.
    #[serde(default = "default_event_types")]
    pub event_types: Vec<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Sync pipeline tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Page cap used when a request does not specify `maxPages`.
    #[serde(default = "default_max_pages")]
    pub default_max_pages: u32,
    /// Upper bound for a requested `maxPages`.
    #[serde(default = "default_max_pages_limit")]
    pub max_pages_limit: u32,
    /// Attempts per page before a rate-limited run is aborted.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Fixed delay between rate-limited attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Delay between consecutive page requests, in milliseconds.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

/// Client controller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the sync service, used by the `sync` subcommand.
    #[serde(default = "default_service_url")]
    pub service_url: String,
    /// Sync-status poll interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Events per cached page.
    #[serde(default = "default_client_page_size")]
    pub page_size: u32,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("activity.db")
}

fn default_upstream_url() -> String {
    "https://api.opensea.io/api/v2".to_string()
}

fn default_chain() -> String {
    "ethereum".to_string()
}

fn default_upstream_page_size() -> u32 {
    50
}

fn default_event_types() -> Vec<String> {
    vec!["sale".to_string(), "transfer".to_string(), "mint".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_pages() -> u32 {
    10
}

fn default_max_pages_limit() -> u32 {
    100
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_page_delay_ms() -> u64 {
    500
}

fn default_service_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_poll_interval_secs() -> u64 {
    7
}

fn default_client_page_size() -> u32 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_url(),
            api_key: None,
            chain: default_chain(),
            page_size: default_upstream_page_size(),
            event_types: default_event_types(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_max_pages: default_max_pages(),
            max_pages_limit: default_max_pages_limit(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            poll_interval_secs: default_poll_interval_secs(),
            page_size: default_client_page_size(),
        }
    }
}

impl UpstreamConfig {
    /// Page size actually sent to the indexer.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_UPSTREAM_PAGE_SIZE)
    }
}

impl SyncSettings {
    /// Build the orchestrator's sync configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            retry: RetryPolicy::fixed(
                self.retry_max_attempts,
                Duration::from_millis(self.retry_delay_ms),
            ),
            page_delay: Duration::from_millis(self.page_delay_ms),
        }
    }

    /// Resolve a requested page cap against the configured default and limit.
    pub fn clamp_max_pages(&self, requested: Option<u32>) -> u32 {
        let limit = self.max_pages_limit.max(1);
        requested
            .unwrap_or(self.default_max_pages)
            .clamp(1, limit)
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load from `path` if it exists, otherwise use defaults. The API key
    /// environment variable is applied in both cases.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            if !api_key.is_empty() {
                config.upstream.api_key = Some(api_key);
            }
        }
        Ok(config)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
