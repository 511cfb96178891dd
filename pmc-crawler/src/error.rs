use std::result;

use crate::retry::RetryableError;
use thiserror::Error;

/// Error types for crawler operations
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    /// XML parsing failed
    #[error("XML parsing failed: {0}")]
    XmlError(String),

    /// Generic API error with HTTP status code
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    /// API rate limit exceeded despite local limiting
    #[error("API rate limit exceeded")]
    RateLimitExceeded,

    /// Requested resource does not exist upstream
    #[error("Resource not found: {id}")]
    ResourceNotFound { id: String },

    /// Downloaded payload failed the PDF sanity check
    #[error("Integrity check failed: {message}")]
    IntegrityError { message: String },

    /// Invalid configuration or query, rejected before any network call
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error for file operations
    #[error("IO error: {message}")]
    IoError { message: String },
}

pub type Result<T> = result::Result<T, CrawlerError>;

impl RetryableError for CrawlerError {
    fn is_retryable(&self) -> bool {
        match self {
            // Network errors are typically transient
            CrawlerError::RequestError(err) => {
                if err.is_timeout() || err.is_connect() {
                    return true;
                }

                // Server errors (5xx) and API-side throttling
                if let Some(status) = err.status() {
                    return status.is_server_error() || status.as_u16() == 429;
                }

                // DNS and other network errors
                !err.is_builder() && !err.is_redirect() && !err.is_decode()
            }

            // Rate limiting should be retried after a cooldown
            CrawlerError::RateLimitExceeded => true,

            // Server errors (5xx) and rate limiting (429) are retryable
            CrawlerError::ApiError { status, message } => {
                (*status >= 500 && *status < 600) || *status == 429 || {
                    let lower_msg = message.to_lowercase();
                    lower_msg.contains("temporarily unavailable")
                        || lower_msg.contains("timeout")
                        || lower_msg.contains("connection")
                }
            }

            // All other errors are not retryable
            CrawlerError::JsonError(_)
            | CrawlerError::XmlError(_)
            | CrawlerError::ResourceNotFound { .. }
            | CrawlerError::IntegrityError { .. }
            | CrawlerError::InvalidConfig(_)
            | CrawlerError::IoError { .. } => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        match self {
            CrawlerError::RateLimitExceeded => true,
            CrawlerError::ApiError { status, .. } => *status == 429,
            CrawlerError::RequestError(err) => {
                err.status().map(|s| s.as_u16() == 429).unwrap_or(false)
            }
            _ => false,
        }
    }

    fn retry_reason(&self) -> &str {
        if self.is_retryable() {
            match self {
                CrawlerError::RequestError(err) if err.is_timeout() => "Request timeout",
                CrawlerError::RequestError(err) if err.is_connect() => "Connection error",
                CrawlerError::RequestError(_) => "Network error",
                CrawlerError::RateLimitExceeded => "Rate limit exceeded",
                CrawlerError::ApiError { status, .. } => match status {
                    429 => "Rate limit exceeded",
                    500..=599 => "Server error",
                    _ => "Temporary API error",
                },
                _ => "Transient error",
            }
        } else {
            match self {
                CrawlerError::JsonError(_) => "Invalid JSON response",
                CrawlerError::XmlError(_) => "Invalid XML response",
                CrawlerError::ResourceNotFound { .. } => "Resource does not exist",
                CrawlerError::IntegrityError { .. } => "Payload failed integrity check",
                CrawlerError::InvalidConfig(_) => "Invalid configuration",
                CrawlerError::IoError { .. } => "File system error",
                _ => "Non-transient error",
            }
        }
    }
}
