//! HTTP client construction
//!
//! One `reqwest::Client` is built per process and handed explicitly to every
//! component that talks to the network.

use crate::config::ArxivConfig;
use crate::errors::{AppError, Result};
use std::time::Duration;

/// Build the shared HTTP client from arXiv transport settings
pub fn build_client(config: &ArxivConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// Map a non-success HTTP status to an upstream error
pub fn status_error(status: reqwest::StatusCode, url: &str) -> AppError {
    AppError::Upstream {
        message: format!("{} returned {}", url, status),
        status: Some(status.as_u16()),
    }
}
