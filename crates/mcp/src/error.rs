//! Errors raised by the protocol handler and its transports.

/// Result type for handler operations.
pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The handler was closed and accepts no more messages.
    #[error("Session is closed")]
    Closed,

    /// `close` was called on a handler that is already closed.
    #[error("Session already closed")]
    AlreadyClosed,

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport I/O failure.
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),
}
