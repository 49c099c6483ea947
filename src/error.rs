//! Error types for native-bridge.

use thiserror::Error;

/// Main error type for host-side operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the stdio streams or the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (invalid frame, corrupted stream, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A capability handler failed while processing a request.
    #[error("{0}")]
    Handler(String),

    /// Encoded frame would exceed the configured maximum.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Invalid host or client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Output channel is gone.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl BridgeError {
    /// Shorthand for a handler failure with a message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
