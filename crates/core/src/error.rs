//! Error types for tool invocations against the ORATS Data API.

use std::time::Duration;

/// Result type for upstream and catalog operations.
pub type OratsResult<T> = Result<T, OratsError>;

/// Errors that can occur while resolving or executing a tool call.
#[derive(Debug, thiserror::Error)]
pub enum OratsError {
    /// No upstream API token is configured.
    #[error("ORATS_API_TOKEN environment variable is required")]
    MissingApiToken,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The invocation names a tool that is not in the catalog.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Upstream answered with a non-success status.
    #[error("API request failed: {status} {status_text}")]
    UpstreamStatus { status: u16, status_text: String },

    /// Connection, protocol or body decoding failure.
    #[error("API request failed: {0}")]
    UpstreamRequest(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("API request timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Coarse classification of an [`OratsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    UnknownTool,
    Upstream,
}

impl OratsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingApiToken | Self::Config(_) => ErrorKind::Configuration,
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::UpstreamStatus { .. }
            | Self::UpstreamRequest(_)
            | Self::UpstreamTimeout(_)
            | Self::InvalidUrl(_) => ErrorKind::Upstream,
        }
    }

    /// HTTP status reported by upstream, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UpstreamStatus { status, .. } => Some(*status),
            Self::UpstreamRequest(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
