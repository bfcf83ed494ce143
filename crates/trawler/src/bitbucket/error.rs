//! Bitbucket harvesting error types.

use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur while harvesting from the Bitbucket API.
#[derive(Debug, Error)]
pub enum BitbucketError {
    /// Network-level failure (connection refused, reset, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server answered with a status from the retry allow-list.
    #[error("Transient HTTP error ({status}): {message}")]
    TransientHttp { status: u16, message: String },

    /// Server answered with a non-success status that is not retried.
    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    /// The retry ceiling was reached without a successful response.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        last: Box<BitbucketError>,
    },

    /// The refresh token could not be exchanged for an access token.
    #[error("Credential exchange failed: {0}")]
    CredentialExchange(String),

    /// A response body was not the JSON we expected.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An item is missing a field needed to identify or order it.
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BitbucketError {
    /// Whether the transport layer should retry after this error.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::TransientHttp { .. })
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransientHttp { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::RetryExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

impl From<HttpError> for BitbucketError {
    fn from(err: HttpError) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Get a short error message suitable for log lines.
pub fn short_error_message(err: &BitbucketError) -> String {
    match err {
        BitbucketError::Connection(_) => "Connection error".to_string(),
        BitbucketError::TransientHttp { status, .. } => format!("HTTP {} (transient)", status),
        BitbucketError::Http { status, message } => {
            if message.len() > 50 {
                let truncated: String = message.chars().take(47).collect();
                format!("HTTP {}: {}...", status, truncated)
            } else {
                format!("HTTP {}: {}", status, message)
            }
        }
        BitbucketError::RetryExhausted { attempts, .. } => {
            format!("Gave up after {} attempts", attempts)
        }
        BitbucketError::CredentialExchange(_) => "Credential exchange failed".to_string(),
        BitbucketError::Json(_) => "JSON parse error".to_string(),
        BitbucketError::InvalidItem(msg) => format!("Invalid item: {}", msg),
        BitbucketError::Config(msg) => format!("Config: {}", msg),
    }
}

/// Result type for Bitbucket operations.
pub type Result<T> = std::result::Result<T, BitbucketError>;
