//! Error types for hoard-core

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Rate limiting reported without an HTTP status, e.g. by an adapter.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the remote side asked us to slow down (HTTP 429).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited(_)) || self.status() == Some(429)
    }

    /// 403 and 404 are how expired signed asset links usually fail.
    pub fn is_link_expired(&self) -> bool {
        matches!(self.status(), Some(403 | 404))
    }

    /// Access-scope denial, as opposed to a missing or broken resource.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::Permission(_)) || self.status() == Some(403)
    }

    /// Short machine-friendly label for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Auth(_) => "auth",
            Error::Permission(_) => "permission",
            Error::HttpStatus { .. } => "http",
            Error::RateLimited(_) => "rate_limited",
            Error::Network(_) => "network",
            Error::Timeout(_) => "timeout",
            Error::Provider(_) => "provider",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Error::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return Error::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(ToString::to_string).unwrap_or_default(),
            };
        }
        Error::Network(err.to_string())
    }
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
