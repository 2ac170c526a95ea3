//! Configuration management for Citeforge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with CITEFORGE__)
//! - Configuration files (config/default, config/{env}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// arXiv endpoints and transport settings
    #[serde(default)]
    pub arxiv: ArxivConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Traversal limits
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Persistence configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArxivConfig {
    /// Atom query endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL of abstract pages
    #[serde(default = "default_abs_url_base")]
    pub abs_url_base: String,

    /// Base URL of PDF downloads
    #[serde(default = "default_pdf_url_base")]
    pub pdf_url_base: String,

    /// Base URL of typesetting-source downloads
    #[serde(default = "default_source_url_base")]
    pub source_url_base: String,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Largest source payload accepted, in bytes
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound of a single backoff delay in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff growth factor
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// Maximum in-flight papers per frontier level
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Outbound requests per second to arXiv
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Burst capacity of the request limiter
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Depth used when the caller does not pass one
    #[serde(default = "default_max_depth")]
    pub default_max_depth: u32,

    /// Hard upper bound for a requested depth
    #[serde(default = "default_max_depth_limit")]
    pub max_depth_limit: u32,

    /// Keywords attached to each persisted graph node
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for persisted records
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name attached to log output
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_api_url() -> String { "http://export.arxiv.org/api/query".to_string() }
fn default_abs_url_base() -> String { "https://arxiv.org/abs/".to_string() }
fn default_pdf_url_base() -> String { "https://arxiv.org/pdf/".to_string() }
fn default_source_url_base() -> String { "https://arxiv.org/e-print/".to_string() }
fn default_user_agent() -> String { crate::DEFAULT_USER_AGENT.to_string() }
fn default_timeout() -> u64 { 30 }
fn default_connect_timeout() -> u64 { 10 }
fn default_max_source_bytes() -> usize { 64 * 1024 * 1024 }
fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 10_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_concurrency() -> usize { 4 }
fn default_requests_per_second() -> u32 { 1 }
fn default_burst() -> u32 { 4 }
fn default_max_depth() -> u32 { 1 }
fn default_max_depth_limit() -> u32 { 5 }
fn default_keyword_limit() -> usize { 10 }
fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_service_name() -> String { "citeforge".to_string() }

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            abs_url_base: default_abs_url_base(),
            pdf_url_base: default_pdf_url_base(),
            source_url_base: default_source_url_base(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_source_bytes: default_max_source_bytes(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            default_max_depth: default_max_depth(),
            max_depth_limit: default_max_depth_limit(),
            keyword_limit: default_keyword_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("CITEFORGE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with CITEFORGE__ prefix
            // e.g., CITEFORGE__CRAWLER__MAX_CONCURRENCY=8
            .add_source(
                Environment::with_prefix("CITEFORGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific configuration file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("CITEFORGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.arxiv.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.arxiv.api_url, "http://export.arxiv.org/api/query");
        assert_eq!(config.crawler.max_concurrency, 4);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("citeforge.toml");
        std::fs::write(
            &path,
            "[crawler]\nmax_concurrency = 9\n\n[storage]\ndata_dir = \"/tmp/graphs\"\n",
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.crawler.max_concurrency, 9);
        assert_eq!(config.crawler.burst, 4);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/graphs"));
        assert_eq!(config.arxiv.source_url_base, "https://arxiv.org/e-print/");
    }
}
