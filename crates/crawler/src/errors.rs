//! Crawler error types

use citeforge_common::errors::AppError;
use citeforge_common::retry::Retryable;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlerError {
    #[error("Invalid identifier '{input}': {reason}")]
    InvalidIdentifier { input: String, reason: String },

    #[error("Metadata not found for {id}: {reason}")]
    MetadataNotFound { id: String, reason: String },

    #[error("Source unavailable for {id}: {reason}")]
    SourceUnavailable { id: String, reason: String },

    #[error("Transport error for {id}: {message}")]
    Transport { id: String, message: String },

    #[error("Parse error in {context}: {message}")]
    Parse { context: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Traversal cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CrawlerError {
    /// Stable label used in graph error records and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CrawlerError::InvalidIdentifier { .. } => "invalid_identifier",
            CrawlerError::MetadataNotFound { .. } => "metadata_not_found",
            CrawlerError::SourceUnavailable { .. } => "source_unavailable",
            CrawlerError::Transport { .. } => "transport_error",
            CrawlerError::Parse { .. } => "parse_error",
            CrawlerError::InvalidInput(_) => "invalid_input",
            CrawlerError::Cancelled => "cancelled",
            CrawlerError::Storage(_) => "storage_error",
        }
    }

    /// Build a transport error from a shared application error
    pub fn transport(id: &str, err: &AppError) -> Self {
        CrawlerError::Transport {
            id: id.to_string(),
            message: err.to_string(),
        }
    }
}

impl Retryable for CrawlerError {
    fn is_transient(&self) -> bool {
        matches!(self, CrawlerError::Transport { .. })
    }
}

/// Shared errors reaching the crawler without a paper in scope
impl From<AppError> for CrawlerError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Upstream { .. } | AppError::HttpClient(_) => CrawlerError::Transport {
                id: "unknown".to_string(),
                message: e.to_string(),
            },
            AppError::Configuration { message } => CrawlerError::InvalidInput(message),
            AppError::Validation { .. }
            | AppError::Storage { .. }
            | AppError::Io(_)
            | AppError::Serialization(_) => CrawlerError::Storage(e.to_string()),
        }
    }
}
