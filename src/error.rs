//! Error types for the enrichment engine
//!
//! `SourceError` is the only error a source client may return; it always
//! carries a `FailureKind` so the retry policy can tell transient from
//! permanent failures. `EnrichError` covers construction-time problems
//! (configuration, files, HTTP client setup).

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::types::FailureKind;

/// Errors raised while configuring or wiring the pipeline
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, EnrichError>;

/// A single failed source call
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct SourceError {
    pub kind: FailureKind,
    pub message: String,
    /// Server-requested delay before the next attempt
    pub retry_after: Option<Duration>,
}

impl SourceError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AuthError, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NetworkError, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ParseError, message)
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let message = format!("HTTP {}: {}", status, snippet);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::auth(message),
            StatusCode::NOT_FOUND | StatusCode::GONE => Self::not_found(message),
            StatusCode::TOO_MANY_REQUESTS => Self::rate_limited(message),
            StatusCode::REQUEST_TIMEOUT => Self::network(message),
            s if s.is_server_error() => Self::network(message),
            _ => Self::parse(message),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::parse(format!("Failed to decode response: {}", err));
        }
        if let Some(status) = err.status() {
            return Self::from_status(status, &err.to_string());
        }
        Self::network(format!("Request failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            SourceError::from_status(StatusCode::UNAUTHORIZED, "").kind,
            FailureKind::AuthError
        );
        assert_eq!(
            SourceError::from_status(StatusCode::FORBIDDEN, "").kind,
            FailureKind::AuthError
        );
        assert_eq!(
            SourceError::from_status(StatusCode::NOT_FOUND, "").kind,
            FailureKind::NotFound
        );
        assert_eq!(
            SourceError::from_status(StatusCode::TOO_MANY_REQUESTS, "").kind,
            FailureKind::RateLimited
        );
        assert_eq!(
            SourceError::from_status(StatusCode::BAD_GATEWAY, "").kind,
            FailureKind::NetworkError
        );
        assert_eq!(
            SourceError::from_status(StatusCode::BAD_REQUEST, "").kind,
            FailureKind::ParseError
        );
    }

    #[test]
    fn test_message_truncates_body() {
        let body = "x".repeat(1000);
        let err = SourceError::from_status(StatusCode::BAD_GATEWAY, &body);
        assert!(err.message.len() < 300);
        assert!(err.is_transient());
    }

    #[test]
    fn test_display() {
        let err = SourceError::auth("REQUEST_DENIED");
        assert_eq!(err.to_string(), "auth-error: REQUEST_DENIED");
    }
}
