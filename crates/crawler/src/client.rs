//! arXiv HTTP client
//!
//! Wraps the injected `reqwest::Client` with the shared request limiter and the
//! configured endpoints. Metadata and source retrieval are implemented on this
//! type in their own modules.

use crate::identifier::PaperId;
use citeforge_common::config::{AppConfig, ArxivConfig};
use citeforge_common::errors::{AppError, Result};
use citeforge_common::http::build_client;
use citeforge_common::rate_limit::{acquire, create_rate_limiter, RequestLimiter};
use std::sync::Arc;
use tracing::debug;

/// Client for the arXiv metadata API and source endpoint
pub struct ArxivClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: ArxivConfig,
    limiter: Arc<RequestLimiter>,
}

impl ArxivClient {
    /// Create a client from explicit parts
    pub fn new(http: reqwest::Client, config: ArxivConfig, limiter: Arc<RequestLimiter>) -> Self {
        Self {
            http,
            config,
            limiter,
        }
    }

    /// Create a client with its own HTTP client and limiter from application config
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = build_client(&config.arxiv)?;
        let limiter = create_rate_limiter(config.crawler.requests_per_second, config.crawler.burst);
        Ok(Self::new(http, config.arxiv.clone(), limiter))
    }

    /// Abstract page URL for a paper
    pub fn abs_url(&self, id: &PaperId) -> String {
        format!("{}{}", self.config.abs_url_base, id)
    }

    /// PDF URL for a paper
    pub fn pdf_url(&self, id: &PaperId) -> String {
        format!("{}{}", self.config.pdf_url_base, id)
    }

    /// Typesetting-source URL for a paper
    pub fn source_url(&self, id: &PaperId) -> String {
        format!("{}{}", self.config.source_url_base, id)
    }

    /// Issue a rate-limited GET request
    pub(crate) async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        acquire(&self.limiter).await;
        debug!(url = %url, "Sending request");

        self.http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(AppError::from)
    }
}
