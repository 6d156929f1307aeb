//! Error types for the upstream client.

use thiserror::Error;
use tradesync_core::retry::{classify_http_status, Classify, RetryClass};

/// Result type alias for upstream operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the upstream API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (bad parameters, unencodable header, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or invalid API key)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl UpstreamError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(err) if is_retryable_transport_error(err) => RetryClass::Retryable,
            Self::Http(_) => RetryClass::Permanent,
            Self::Json(_) | Self::InvalidRequest(_) | Self::Auth(_) => RetryClass::Permanent,
        }
    }
}

impl Classify for UpstreamError {
    fn retry_class(&self) -> RetryClass {
        UpstreamError::retry_class(self)
    }
}

/// Timeouts, refused or reset connections and bodies cut off mid-read.
pub(crate) fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
}

impl From<UpstreamError> for tradesync_core::Error {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Api { status, message } => {
                tradesync_core::Error::network(Some(status), message)
            }
            UpstreamError::Http(err) => {
                let status = err.status().map(|s| s.as_u16());
                tradesync_core::Error::network(status, err.to_string())
            }
            UpstreamError::Json(err) => tradesync_core::Error::Json(err),
            UpstreamError::InvalidRequest(message) => tradesync_core::Error::validation(message),
            UpstreamError::Auth(message) => tradesync_core::Error::network(Some(401), message),
        }
    }
}
