//! # Error Types
//!
//! Custom error types for the balloon ground station using `thiserror`.

use thiserror::Error;

/// Main error type for the ground station
#[derive(Debug, Error)]
pub enum GroundStationError {
    /// Payload decode errors (bad numbers, malformed positions)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Sink errors (image persistence, log output)
    #[error("Sink error: {0}")]
    Sink(String),

    /// The station actor has shut down
    #[error("Station closed: {0}")]
    StationClosed(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the ground station
pub type Result<T> = std::result::Result<T, GroundStationError>;
