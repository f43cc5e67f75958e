//! Error types for `RigFleet` core library.

use thiserror::Error;

/// Result type alias using `RigFleet` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `RigFleet` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Inbound frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
