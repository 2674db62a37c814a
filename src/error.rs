//! Error Handling Module
//!
//! Two error families live here:
//! - [`ApiError`]: failures produced by the wrapped generative-AI client. The
//!   metering layer re-classifies and enriches these, but always hands them
//!   back to the caller.
//! - [`MeteringError`]: failures of the metering layer itself. These are
//!   absorbed at the delivery boundary and only ever show up in logs.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// Connection, DNS, timeout or socket level failure
    Network,
    /// Credentials, endpoint or deployment misconfiguration
    Configuration,
    /// Upstream throttling (429)
    RateLimit,
    /// Upstream 5xx
    Server,
    /// Anything that does not match a known shape
    Other,
}

impl ApiErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Configuration => "configuration",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the wrapped API surface.
///
/// Clients implementing [`crate::api`] traits construct these; the router
/// fills in `kind` (when still [`ApiErrorKind::Other`]) and `duration`
/// before returning the error to the caller.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status code, when the failure came from an HTTP response
    pub status: Option<u16>,
    /// Human readable message as reported by the upstream client
    pub message: String,
    /// Classification of the failure
    pub kind: ApiErrorKind,
    /// Wall-clock time spent before the failure surfaced
    pub duration: Option<Duration>,
    /// Optional provider error body
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            kind: ApiErrorKind::Other,
            duration: None,
            details: None,
        }
    }

    /// Create an error carrying an HTTP status.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            ..Self::new(message)
        }
    }

    pub const fn with_kind(mut self, kind: ApiErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub const fn is_network(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Network)
    }

    pub const fn is_configuration(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Configuration)
    }

    /// Whether retrying the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ApiErrorKind::Network | ApiErrorKind::RateLimit | ApiErrorKind::Server => true,
            ApiErrorKind::Configuration => false,
            ApiErrorKind::Other => matches!(self.status, Some(408 | 429 | 500..=599)),
        }
    }
}

/// Errors raised inside the metering layer.
#[derive(Debug, Clone, Error)]
pub enum MeteringError {
    /// Transport-level failure talking to the metering service
    #[error("HTTP error: {0}")]
    Http(String),

    /// The metering service answered with a non-success status
    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A response or metadata object failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A provider detection strategy failed
    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeteringError {
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a delivery attempt that failed with this error may be retried.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { code, .. } => matches!(*code, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for MeteringError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(crate::sanitize::sanitize_text(&err.to_string()))
    }
}

impl From<serde_json::Error> for MeteringError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<validator::ValidationErrors> for MeteringError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}
