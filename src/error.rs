//! Error types for the scan pipeline.
//!
//! Only the fallible edges return these: configuration, the serial channel,
//! the async runtime, and logging setup. Scan noise, checksum mismatches,
//! listener panics and render failures are absorbed where they happen and
//! never reach the caller as an `Err`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// A value passed to the codec is not a barcode it can handle.
    #[error("Invalid barcode: {0}")]
    InvalidCode(String),

    /// Configuration values out of range or unparsable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serial port open/read failures.
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Bar-image generation failed (used internally before falling back).
    #[error("Render error: {0}")]
    Render(String),

    /// The runtime's command queue is full; the event was dropped.
    #[error("Scanner queue full")]
    QueueFull,

    /// The runtime's command queue has shut down.
    #[error("Scanner runtime closed")]
    Closed,
}

impl From<serialport::Error> for ScanError {
    fn from(e: serialport::Error) -> Self {
        ScanError::Serial(e.to_string())
    }
}

/// Convenience Result type for this crate.
pub type Result<T> = std::result::Result<T, ScanError>;
