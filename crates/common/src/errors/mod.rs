//! Error types for Citeforge
//!
//! Provides a shared error handling system with:
//! - Distinct error types for different failure modes
//! - Transient/permanent classification for retry decisions

use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Storage errors
    #[error("Storage error for key '{key}': {message}")]
    Storage { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // External service errors
    #[error("Upstream service error: {message}")]
    Upstream { message: String, status: Option<u16> },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::HttpClient(_) => true,
            AppError::Upstream { status, .. } => match status {
                Some(code) => *code == 429 || *code >= 500,
                None => true,
            },
            _ => false,
        }
    }
}
