//! Error types for serial-io.

use thiserror::Error;

/// Main error type for all serial-io operations.
#[derive(Debug, Error)]
pub enum SerialIoError {
    /// I/O error from the underlying transport (write/drain/read failures).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial driver refused to open, configure, or clone the port.
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    /// No matching reply arrived within the transaction timeout.
    #[error("timeout reached")]
    Timeout,

    /// The peer answered with an ERROR message; Display is the peer's text
    /// verbatim.
    #[error("{0}")]
    Remote(String),

    /// JSON serialization error (convenience payload wrapper only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine is not open, or the link went down mid-operation.
    #[error("port closed")]
    Closed,
}

/// Result type alias using SerialIoError.
pub type Result<T> = std::result::Result<T, SerialIoError>;
