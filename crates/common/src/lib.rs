//! Citeforge Common Library
//!
//! Shared code for the Citeforge crawler including:
//! - Error types and handling
//! - Configuration management
//! - Tracing initialisation
//! - HTTP client construction, rate limiting and retry policy
//! - Metrics and observability
//! - The record persistence sink

pub mod config;
pub mod errors;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod retry;
pub mod storage;
pub mod telemetry;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use retry::{Retryable, RetryPolicy};
pub use storage::{JsonStorage, MemoryStorage, Record, Storage};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default user agent sent to remote services
pub const DEFAULT_USER_AGENT: &str = concat!("citeforge/", env!("CARGO_PKG_VERSION"));
